//! Register layout of the lamp.

use crate::error::ConfigError;

pub const REG_MODE: u16 = 0x0000;
pub const REG_HUE: u16 = 0x0001;
pub const REG_SATURATION: u16 = 0x0002;
pub const REG_VALUE: u16 = 0x0003;
pub const REG_PARAM: u16 = 0x0004;

/// Number of configuration registers starting at [`REG_MODE`].
pub const CONFIG_REGISTER_COUNT: u16 = 5;

/// First of the twelve spectrum band registers.
pub const BAND_BASE: u16 = 0x0100;

pub const BAND_COUNT: usize = 12;

/// Lamp configuration held in registers 0x0000..=0x0004.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LampConfig {
    pub mode: u16,
    /// Degrees, 0..=359.
    pub hue: u16,
    pub saturation: u8,
    pub value: u8,
    /// Mode-specific parameter.
    pub param: u8,
}

impl LampConfig {
    /// Build from raw register values, rejecting anything outside the documented ranges.
    pub fn from_registers(values: &[u16]) -> Result<Self, ConfigError> {
        if values.len() < CONFIG_REGISTER_COUNT as usize {
            return Err(ConfigError::OutOfRange {
                name: "register count",
                value: values.len() as f64,
                range: ">= 5",
            });
        }
        let hue = check_u16("hue", values[1], 359)?;
        let saturation = check_byte("saturation", values[2])?;
        let value = check_byte("value", values[3])?;
        let param = check_byte("param", values[4])?;
        Ok(Self {
            mode: values[0],
            hue,
            saturation,
            value,
            param,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_u16("hue", self.hue, 359).map(|_| ())
    }

    /// Register values in address order starting at [`REG_MODE`].
    pub fn to_registers(&self) -> [u16; CONFIG_REGISTER_COUNT as usize] {
        [
            self.mode,
            self.hue,
            self.saturation as u16,
            self.value as u16,
            self.param as u16,
        ]
    }
}

fn check_u16(name: &'static str, v: u16, max: u16) -> Result<u16, ConfigError> {
    if v > max {
        return Err(ConfigError::OutOfRange {
            name,
            value: v as f64,
            range: "0..=359",
        });
    }
    Ok(v)
}

fn check_byte(name: &'static str, v: u16) -> Result<u8, ConfigError> {
    u8::try_from(v).map_err(|_| ConfigError::OutOfRange {
        name,
        value: v as f64,
        range: "0..=255",
    })
}
