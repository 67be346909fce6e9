//! Platform capability model
//!
//! Describes what a device platform can do: which pins it exposes, the modes
//! each pin supports, the communication protocols it speaks and its electrical
//! limits. A [`PlatformCapabilities`] value is produced by a transport when an
//! adapter initializes; the adapter owns the live copy (pin claims mutate it)
//! and hands out clones as read-only snapshots.
//!
//! ## Pin Access Rules
//!
//! - A pin holds at most one active mode at a time
//! - Reserved pins reject every mode change
//! - Re-claiming a pin in the mode it already holds is allowed
//!
//! ```rust
//! use types::{PinMode, PlatformCapabilities};
//!
//! let caps = PlatformCapabilities::raspberry_pi();
//! assert!(caps.validate_pin_access(18, PinMode::Pwm));
//! assert!(!caps.validate_pin_access(200, PinMode::Input));
//! ```

use crate::errors::CapabilityError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Operating mode a pin can be configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinMode {
    /// Digital input
    Input,
    /// Digital output
    Output,
    /// Pulse-width modulated output
    Pwm,
    /// Analog input through an ADC
    Analog,
    /// I2C bus line (SDA/SCL)
    I2c,
    /// SPI bus line
    Spi,
    /// UART line
    Uart,
    /// Edge-triggered interrupt input
    Interrupt,
}

impl PinMode {
    /// Whether this mode attaches the pin to a shared bus
    pub fn is_bus(&self) -> bool {
        matches!(self, PinMode::I2c | PinMode::Spi | PinMode::Uart)
    }

    /// Whether a pin set up in this mode can be read as a digital level
    pub fn is_readable(&self) -> bool {
        matches!(self, PinMode::Input | PinMode::Interrupt | PinMode::Output)
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PinMode::Input => "input",
            PinMode::Output => "output",
            PinMode::Pwm => "pwm",
            PinMode::Analog => "analog",
            PinMode::I2c => "i2c",
            PinMode::Spi => "spi",
            PinMode::Uart => "uart",
            PinMode::Interrupt => "interrupt",
        };
        f.write_str(name)
    }
}

/// Communication protocol a platform supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Gpio,
    I2c,
    Spi,
    Uart,
    OneWire,
    Http,
    WebSocket,
    Mqtt,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_lowercase())
    }
}

/// Capability and live state of a single pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinCapability {
    /// Platform pin number (BCM numbering on Raspberry Pi, GPIO number on ESP32)
    pub pin: u8,
    /// Modes this pin can be configured for
    pub modes: BTreeSet<PinMode>,
    /// Mode the pin currently holds, if claimed
    pub current_mode: Option<PinMode>,
    /// Pin is claimed by an active setup
    pub in_use: bool,
    /// Pin is reserved by the platform (flash, console, boot strapping)
    pub reserved: bool,
    /// Maximum source/sink current in milliamps
    pub max_current_ma: f32,
    /// Maximum tolerated voltage
    pub max_voltage: f32,
    /// ADC resolution in bits, for analog-capable pins
    pub adc_resolution_bits: Option<u8>,
}

impl PinCapability {
    /// Create a free, unreserved pin supporting `modes`
    pub fn new(pin: u8, modes: impl IntoIterator<Item = PinMode>) -> Self {
        Self {
            pin,
            modes: modes.into_iter().collect(),
            current_mode: None,
            in_use: false,
            reserved: false,
            max_current_ma: 16.0,
            max_voltage: 3.3,
            adc_resolution_bits: None,
        }
    }

    /// Set electrical limits
    pub fn with_limits(mut self, max_current_ma: f32, max_voltage: f32) -> Self {
        self.max_current_ma = max_current_ma;
        self.max_voltage = max_voltage;
        self
    }

    /// Mark the pin as ADC capable with the given resolution
    pub fn with_adc(mut self, bits: u8) -> Self {
        self.modes.insert(PinMode::Analog);
        self.adc_resolution_bits = Some(bits);
        self
    }

    /// Mark the pin as reserved by the platform
    pub fn reserved(mut self) -> Self {
        self.reserved = true;
        self
    }

    /// Pin supports `mode`
    pub fn supports(&self, mode: PinMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Pin is supported, unreserved and either free or already in `mode`
    pub fn can_use(&self, mode: PinMode) -> bool {
        if self.reserved || !self.supports(mode) {
            return false;
        }
        match (self.in_use, self.current_mode) {
            (false, _) => true,
            (true, Some(current)) => current == mode,
            (true, None) => false,
        }
    }

    /// Pin is free for a new claim in `mode`
    pub fn is_available(&self, mode: PinMode) -> bool {
        !self.in_use && !self.reserved && self.supports(mode)
    }

    /// Claim the pin for `mode`
    pub fn claim(&mut self, mode: PinMode) -> Result<(), CapabilityError> {
        if self.reserved {
            return Err(CapabilityError::PinReserved { pin: self.pin });
        }
        if !self.supports(mode) {
            return Err(CapabilityError::ModeNotSupported { pin: self.pin, mode });
        }
        if let (true, Some(current)) = (self.in_use, self.current_mode) {
            if current != mode {
                return Err(CapabilityError::PinConflict {
                    pin: self.pin,
                    current,
                    requested: mode,
                });
            }
        }
        self.current_mode = Some(mode);
        self.in_use = true;
        Ok(())
    }

    /// Release the pin so it can be claimed again
    pub fn release(&mut self) {
        self.current_mode = None;
        self.in_use = false;
    }
}

/// Platform feature flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFeatures {
    pub wireless: bool,
    pub bluetooth: bool,
    pub deep_sleep: bool,
    pub real_time_clock: bool,
    pub hardware_pwm: bool,
}

/// Capability snapshot of a device platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformCapabilities {
    /// Platform name (e.g. "raspberry_pi")
    pub name: String,
    /// Platform or firmware version
    pub version: String,
    /// All pins exposed by the platform
    pub pins: Vec<PinCapability>,
    /// Supported communication protocols
    pub protocols: BTreeSet<Protocol>,
    /// Maximum total GPIO current in milliamps
    pub max_gpio_current_ma: f32,
    /// Operating voltage of the logic rail
    pub operating_voltage: f32,
    /// Feature flags
    pub features: PlatformFeatures,
}

impl PlatformCapabilities {
    /// Generic platform with no pins; network-only devices start from here
    pub fn generic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "unknown".to_string(),
            pins: Vec::new(),
            protocols: BTreeSet::new(),
            max_gpio_current_ma: 0.0,
            operating_voltage: 3.3,
            features: PlatformFeatures::default(),
        }
    }

    /// Raspberry Pi 40-pin header (BCM numbering)
    pub fn raspberry_pi() -> Self {
        let mut pins = Vec::new();
        for pin in 0..=27u8 {
            let mut modes = vec![PinMode::Input, PinMode::Output, PinMode::Interrupt];
            match pin {
                2 | 3 => modes.push(PinMode::I2c),
                7..=11 => modes.push(PinMode::Spi),
                14 | 15 => modes.push(PinMode::Uart),
                12 | 13 | 18 | 19 => modes.push(PinMode::Pwm),
                _ => {}
            }
            let mut capability = PinCapability::new(pin, modes).with_limits(16.0, 3.3);
            // ID EEPROM lines
            if pin <= 1 {
                capability = capability.reserved();
            }
            pins.push(capability);
        }

        Self {
            name: "raspberry_pi".to_string(),
            version: "4b".to_string(),
            pins,
            protocols: [Protocol::Gpio, Protocol::I2c, Protocol::Spi, Protocol::Uart, Protocol::OneWire]
                .into_iter()
                .collect(),
            max_gpio_current_ma: 50.0,
            operating_voltage: 3.3,
            features: PlatformFeatures {
                wireless: true,
                bluetooth: true,
                deep_sleep: false,
                real_time_clock: false,
                hardware_pwm: true,
            },
        }
    }

    /// ESP32 dev board
    pub fn esp32() -> Self {
        let mut pins = Vec::new();
        for pin in 0..=39u8 {
            // 20, 24 and 28..=31 are not bonded out
            if matches!(pin, 20 | 24 | 28..=31) {
                continue;
            }
            let input_only = pin >= 34;
            let mut modes = vec![PinMode::Input, PinMode::Interrupt];
            if !input_only {
                modes.extend([PinMode::Output, PinMode::Pwm]);
            }
            match pin {
                21 | 22 => modes.push(PinMode::I2c),
                18 | 19 | 23 | 5 => modes.push(PinMode::Spi),
                1 | 3 | 16 | 17 => modes.push(PinMode::Uart),
                _ => {}
            }
            let mut capability = PinCapability::new(pin, modes).with_limits(40.0, 3.3);
            if matches!(pin, 32..=39) {
                capability = capability.with_adc(12);
            }
            // SPI flash
            if matches!(pin, 6..=11) {
                capability = capability.reserved();
            }
            pins.push(capability);
        }

        Self {
            name: "esp32".to_string(),
            version: "esp-idf-5".to_string(),
            pins,
            protocols: [
                Protocol::Gpio,
                Protocol::I2c,
                Protocol::Spi,
                Protocol::Uart,
                Protocol::Http,
                Protocol::WebSocket,
                Protocol::Mqtt,
            ]
            .into_iter()
            .collect(),
            max_gpio_current_ma: 1200.0,
            operating_voltage: 3.3,
            features: PlatformFeatures {
                wireless: true,
                bluetooth: true,
                deep_sleep: true,
                real_time_clock: true,
                hardware_pwm: true,
            },
        }
    }

    /// Arduino Uno (ATmega328P)
    pub fn arduino_uno() -> Self {
        let mut pins = Vec::new();
        for pin in 0..=13u8 {
            let mut modes = vec![PinMode::Input, PinMode::Output];
            match pin {
                0 | 1 => modes.push(PinMode::Uart),
                2 | 3 => modes.push(PinMode::Interrupt),
                10..=13 => modes.push(PinMode::Spi),
                _ => {}
            }
            if matches!(pin, 3 | 5 | 6 | 9 | 10 | 11) {
                modes.push(PinMode::Pwm);
            }
            pins.push(PinCapability::new(pin, modes).with_limits(20.0, 5.0));
        }
        // A0..A5 are numbered 14..=19; A4/A5 double as I2C
        for pin in 14..=19u8 {
            let mut modes = vec![PinMode::Input, PinMode::Output];
            if matches!(pin, 18 | 19) {
                modes.push(PinMode::I2c);
            }
            pins.push(PinCapability::new(pin, modes).with_limits(20.0, 5.0).with_adc(10));
        }

        Self {
            name: "arduino_uno".to_string(),
            version: "r3".to_string(),
            pins,
            protocols: [Protocol::Gpio, Protocol::I2c, Protocol::Spi, Protocol::Uart]
                .into_iter()
                .collect(),
            max_gpio_current_ma: 200.0,
            operating_voltage: 5.0,
            features: PlatformFeatures::default(),
        }
    }

    /// Resolve a built-in profile by name
    pub fn profile(name: &str) -> Result<Self, CapabilityError> {
        match name.to_lowercase().replace('-', "_").as_str() {
            "raspberry_pi" | "rpi" => Ok(Self::raspberry_pi()),
            "esp32" => Ok(Self::esp32()),
            "arduino_uno" | "arduino" => Ok(Self::arduino_uno()),
            "generic" => Ok(Self::generic("generic")),
            _ => Err(CapabilityError::UnknownProfile(name.to_string())),
        }
    }

    /// Look up a pin
    pub fn pin(&self, pin: u8) -> Option<&PinCapability> {
        self.pins.iter().find(|p| p.pin == pin)
    }

    /// Look up a pin mutably
    pub fn pin_mut(&mut self, pin: u8) -> Option<&mut PinCapability> {
        self.pins.iter_mut().find(|p| p.pin == pin)
    }

    /// Whether `pin` may be set up in `mode` right now
    ///
    /// False when the pin is unknown, reserved, does not support the mode, or
    /// is already in use with a different mode.
    pub fn validate_pin_access(&self, pin: u8, mode: PinMode) -> bool {
        self.pin(pin).map(|p| p.can_use(mode)).unwrap_or(false)
    }

    /// Pins supporting `mode` that are neither in use nor reserved
    pub fn available_pins(&self, mode: PinMode) -> Vec<PinCapability> {
        self.pins
            .iter()
            .filter(|p| p.is_available(mode))
            .cloned()
            .collect()
    }

    /// Claim `pin` for `mode`
    pub fn claim_pin(&mut self, pin: u8, mode: PinMode) -> Result<(), CapabilityError> {
        self.pin_mut(pin)
            .ok_or(CapabilityError::UnknownPin { pin })?
            .claim(mode)
    }

    /// Release `pin`; returns false when the pin is unknown
    pub fn release_pin(&mut self, pin: u8) -> bool {
        match self.pin_mut(pin) {
            Some(p) => {
                p.release();
                true
            }
            None => false,
        }
    }

    /// Release every claimed pin
    pub fn release_all(&mut self) {
        self.pins.iter_mut().for_each(PinCapability::release);
    }

    /// Pins currently in use, with the mode they were claimed for
    pub fn claimed_pins(&self) -> Vec<(u8, PinMode)> {
        self.pins
            .iter()
            .filter(|p| p.in_use)
            .filter_map(|p| p.current_mode.map(|mode| (p.pin, mode)))
            .collect()
    }

    /// Pins usable as digital I/O
    pub fn digital_pins(&self) -> Vec<&PinCapability> {
        self.pins
            .iter()
            .filter(|p| p.supports(PinMode::Input) || p.supports(PinMode::Output))
            .collect()
    }

    /// Pins with an ADC channel
    pub fn analog_pins(&self) -> Vec<&PinCapability> {
        self.pins.iter().filter(|p| p.supports(PinMode::Analog)).collect()
    }

    /// Pins with PWM output
    pub fn pwm_pins(&self) -> Vec<&PinCapability> {
        self.pins.iter().filter(|p| p.supports(PinMode::Pwm)).collect()
    }

    /// Platform speaks `protocol`
    pub fn supports_protocol(&self, protocol: Protocol) -> bool {
        self.protocols.contains(&protocol)
    }
}
