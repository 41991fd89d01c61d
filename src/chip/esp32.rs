use super::EsptoolChip;

pub struct Esp32;

impl EsptoolChip for Esp32 {
    const CHIP_ID: &'static str = "esp32";

    // Compressed upload, MicroPython images for the ESP32 start at 0x1000
    const WRITE_ARGS: &'static [&'static str] = &["-z", "0x1000"];
}
