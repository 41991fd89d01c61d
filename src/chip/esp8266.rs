use super::EsptoolChip;

pub struct Esp8266;

impl EsptoolChip for Esp8266 {
    const CHIP_ID: &'static str = "esp8266";

    // ESP8266 modules ship with many different flash sizes, let the tool
    // read it from the chip. The image starts at offset 0.
    const WRITE_ARGS: &'static [&'static str] = &["--flash_size=detect", "0"];
}
