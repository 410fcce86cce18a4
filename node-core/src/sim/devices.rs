use super::SlaveDevice;
use crate::bus::SlaveAddress;
use crate::sensors::{si7021, veml6030};

/// Si7021 register model with a configurable conversion delay.
#[derive(Clone, Debug)]
pub struct Si7021Model {
    pub humidity_raw: u16,
    pub temperature_raw: u16,
    /// Read-address attempts NACKed after a measurement command.
    pub conversion_nacks: u8,
    user_register: u8,
    command: Option<u8>,
    written: u8,
    converting: u8,
    out: [u8; 2],
    out_index: usize,
}

impl Si7021Model {
    /// Sensor at roughly 45 %RH and 74 °F.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            humidity_raw: 0x683A,
            temperature_raw: 0x6600,
            conversion_nacks: 2,
            user_register: si7021::USER_REGISTER_RESET,
            command: None,
            written: 0,
            converting: 0,
            out: [0; 2],
            out_index: 0,
        }
    }

    pub const fn user_register(&self) -> u8 {
        self.user_register
    }

    fn respond(&mut self, bytes: [u8; 2]) {
        self.out = bytes;
        self.out_index = 0;
    }
}

impl Default for Si7021Model {
    fn default() -> Self {
        Self::new()
    }
}

impl SlaveDevice for Si7021Model {
    fn address(&self) -> SlaveAddress {
        si7021::ADDRESS
    }

    fn begin_write(&mut self) {
        self.command = None;
        self.written = 0;
    }

    fn write(&mut self, byte: u8) {
        self.written = self.written.saturating_add(1);
        match (self.command, self.written) {
            (None, _) => {
                self.command = Some(byte);
                match byte {
                    si7021::CMD_MEASURE_HUMIDITY_NO_HOLD => {
                        self.respond(self.humidity_raw.to_be_bytes());
                        self.converting = self.conversion_nacks;
                    }
                    si7021::CMD_MEASURE_TEMPERATURE_NO_HOLD => {
                        self.respond(self.temperature_raw.to_be_bytes());
                        self.converting = self.conversion_nacks;
                    }
                    si7021::CMD_TEMPERATURE_FROM_HUMIDITY => {
                        self.respond(self.temperature_raw.to_be_bytes());
                    }
                    si7021::CMD_READ_USER_REGISTER => self.respond([self.user_register, 0]),
                    _ => {}
                }
            }
            (Some(si7021::CMD_WRITE_USER_REGISTER), 2) => {
                self.user_register = (self.user_register & !si7021::RESOLUTION_MASK)
                    | (byte & si7021::RESOLUTION_MASK);
            }
            (Some(_), _) => {}
        }
    }

    fn ready_for_read(&mut self) -> bool {
        if self.converting > 0 {
            self.converting -= 1;
            return false;
        }
        true
    }

    fn read(&mut self) -> u8 {
        let byte = self.out.get(self.out_index).copied().unwrap_or(0xFF);
        self.out_index += 1;
        byte
    }
}

/// VEML6030 with a fixed ambient reading.
#[derive(Clone, Debug)]
pub struct Veml6030Model {
    pub als_raw: u16,
    config: u16,
    pointer: u8,
    written: u8,
    read_index: usize,
}

impl Veml6030Model {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            als_raw: 5208,
            // Powered down until configured.
            config: 0x0001,
            pointer: 0,
            written: 0,
            read_index: 0,
        }
    }

    pub const fn config(&self) -> u16 {
        self.config
    }

    fn register(&self) -> u16 {
        match self.pointer {
            veml6030::REG_ALS_CONFIG => self.config,
            veml6030::REG_ALS_OUTPUT => self.als_raw,
            _ => 0,
        }
    }
}

impl Default for Veml6030Model {
    fn default() -> Self {
        Self::new()
    }
}

impl SlaveDevice for Veml6030Model {
    fn address(&self) -> SlaveAddress {
        veml6030::ADDRESS
    }

    fn begin_write(&mut self) {
        self.written = 0;
        self.read_index = 0;
    }

    fn write(&mut self, byte: u8) {
        match self.written {
            0 => self.pointer = byte,
            1 if self.pointer == veml6030::REG_ALS_CONFIG => {
                self.config = (self.config & 0xFF00) | u16::from(byte);
            }
            2 if self.pointer == veml6030::REG_ALS_CONFIG => {
                self.config = (self.config & 0x00FF) | (u16::from(byte) << 8);
            }
            _ => {}
        }
        self.written = self.written.saturating_add(1);
    }

    fn read(&mut self) -> u8 {
        let bytes = self.register().to_le_bytes();
        let byte = bytes.get(self.read_index).copied().unwrap_or(0xFF);
        self.read_index += 1;
        byte
    }
}
