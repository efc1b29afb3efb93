//! Opening both channels: real serial ports via the `serialport` crate, or
//! the simulated stand-ins from [`crate::sim`].

use std::time::Duration;

use log::info;

use crate::config::{ActuatorSettings, SensorSettings};
use crate::dispatcher::ActuatorPort;
use crate::error::{BridgeError, Channel};
use crate::ingest::SensorPort;
use crate::sim::{LogSink, SimulatedHeadset};

/// Frame rate of the simulated headset. Real eSense values arrive once a second.
const SIM_FRAME_INTERVAL: Duration = Duration::from_millis(500);

/// Write timeout on the actuator port. Frames are a few bytes long; a write
/// that takes longer than this means the controller stopped reading.
const WRITE_TIMEOUT: Duration = Duration::from_millis(200);

/// Open the headset port with the configured per-read timeout.
pub fn open_sensor(settings: &SensorSettings) -> Result<SensorPort, BridgeError> {
    let port = serialport::new(&settings.port, settings.baud)
        .timeout(settings.read_timeout())
        .open()
        .map_err(|e| BridgeError::OpenFailed {
            channel: Channel::Sensor,
            port: settings.port.clone(),
            source: e.into(),
        })?;
    info!("sensor: opened {} at {} baud", settings.port, settings.baud);
    Ok(Box::new(port))
}

/// Open the arm controller port.
///
/// Opening asserts DTR, which resets most Arduino boards; pair this with
/// [`crate::dispatcher::Dispatcher::open`] and a settle delay.
pub fn open_actuator(settings: &ActuatorSettings) -> Result<ActuatorPort, BridgeError> {
    let port = serialport::new(&settings.port, settings.baud)
        .timeout(WRITE_TIMEOUT)
        .open()
        .map_err(|e| BridgeError::OpenFailed {
            channel: Channel::Actuator,
            port: settings.port.clone(),
            source: e.into(),
        })?;
    info!("actuator: opened {} at {} baud", settings.port, settings.baud);
    Ok(Box::new(port))
}

// ── Port selection ────────────────────────────────────────────────────────────

/// Deferred open of the sensor channel, run on the ingestion thread.
pub type SensorOpener = Box<dyn FnOnce() -> Result<SensorPort, BridgeError> + Send>;

/// Deferred open of the actuator channel, run on a blocking task.
pub type ActuatorOpener = Box<dyn FnOnce() -> Result<ActuatorPort, BridgeError> + Send>;

/// The real headset port, or a [`SimulatedHeadset`] emitting a frame every
/// half second when `simulate` is set.
pub fn sensor_opener(settings: &SensorSettings, simulate: bool) -> SensorOpener {
    if simulate {
        let timeout = settings.read_timeout();
        Box::new(move || {
            info!("sensor: using the simulated headset");
            Ok(Box::new(SimulatedHeadset::new(SIM_FRAME_INTERVAL, timeout)) as SensorPort)
        })
    } else {
        let settings = settings.clone();
        Box::new(move || open_sensor(&settings))
    }
}

/// The real arm port, or a [`LogSink`] when `simulate` is set.
pub fn actuator_opener(settings: &ActuatorSettings, simulate: bool) -> ActuatorOpener {
    if simulate {
        Box::new(|| {
            info!("actuator: logging commands instead of writing to a port");
            Ok(Box::new(LogSink::new()) as ActuatorPort)
        })
    } else {
        let settings = settings.clone();
        Box::new(move || open_actuator(&settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn missing_device_is_an_open_error_naming_the_port() {
        let settings = SensorSettings::new("/dev/thinkgear-arm-does-not-exist");
        let err = sensor_opener(&settings, false)().err().unwrap();
        match err {
            BridgeError::OpenFailed { channel, port, .. } => {
                assert_eq!(channel, Channel::Sensor);
                assert_eq!(port, "/dev/thinkgear-arm-does-not-exist");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn simulated_ports_need_no_hardware() {
        let mut sensor = sensor_opener(&SensorSettings::new("unused"), true)().unwrap();
        let mut buf = [0u8; 64];
        assert!(sensor.read(&mut buf).unwrap() > 0);

        let mut arm = actuator_opener(&ActuatorSettings::new("unused"), true)().unwrap();
        arm.write_all(b"HOME\n").unwrap();
    }
}
