//! Minimal sysfs GPIO access (`/sys/class/gpio`)

use sorter_core::{Result, SorterError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// One exported GPIO line
#[derive(Debug)]
pub struct GpioPin {
    root: PathBuf,
    pin: u32,
    exported_here: bool,
}

impl GpioPin {
    /// Export `pin` under `root` (if not already exported) and set its direction.
    pub fn open(root: &Path, pin: u32, direction: Direction) -> Result<Self> {
        let line_dir = root.join(format!("gpio{}", pin));
        let mut exported_here = false;
        if !line_dir.exists() {
            fs::write(root.join("export"), pin.to_string()).map_err(|e| {
                SorterError::ActuationFailed(format!("failed to export gpio {}: {}", pin, e))
            })?;
            exported_here = true;
        }

        let gpio = Self {
            root: root.to_path_buf(),
            pin,
            exported_here,
        };
        fs::write(gpio.attr("direction"), direction.as_str()).map_err(|e| {
            SorterError::ActuationFailed(format!("failed to set gpio {} direction: {}", pin, e))
        })?;
        debug!("gpio {} opened as {}", pin, direction.as_str());
        Ok(gpio)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn attr(&self, name: &str) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin)).join(name)
    }

    pub fn read(&self) -> Result<bool> {
        let raw = fs::read_to_string(self.attr("value")).map_err(|e| {
            SorterError::SensorReadError(format!("gpio {} read failed: {}", self.pin, e))
        })?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(SorterError::SensorReadError(format!(
                "gpio {} returned unexpected value '{}'",
                self.pin, other
            ))),
        }
    }

    pub fn write(&self, high: bool) -> Result<()> {
        fs::write(self.attr("value"), if high { "1" } else { "0" }).map_err(|e| {
            SorterError::ActuationFailed(format!("gpio {} write failed: {}", self.pin, e))
        })
    }

    /// Unexport the line if this handle exported it
    pub fn release(&self) {
        if self.exported_here {
            if let Err(e) = fs::write(self.root.join("unexport"), self.pin.to_string()) {
                debug!("gpio {} unexport failed: {}", self.pin, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_line(root: &Path, pin: u32, value: &str) {
        let dir = root.join(format!("gpio{}", pin));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("value"), value).unwrap();
        fs::write(dir.join("direction"), "in").unwrap();
    }

    #[test]
    fn test_read_and_write() {
        let root = tempfile::tempdir().unwrap();
        fake_line(root.path(), 17, "1\n");

        let pin = GpioPin::open(root.path(), 17, Direction::Out).unwrap();
        assert!(pin.read().unwrap());
        pin.write(false).unwrap();
        assert!(!pin.read().unwrap());
        assert_eq!(
            fs::read_to_string(root.path().join("gpio17/direction")).unwrap(),
            "out"
        );
    }

    #[test]
    fn test_garbage_value_is_sensor_error() {
        let root = tempfile::tempdir().unwrap();
        fake_line(root.path(), 4, "x");
        let pin = GpioPin::open(root.path(), 4, Direction::In).unwrap();
        assert!(matches!(pin.read(), Err(SorterError::SensorReadError(_))));
    }

    #[test]
    fn test_open_missing_root_fails() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        assert!(GpioPin::open(&missing, 27, Direction::Out).is_err());
    }
}
