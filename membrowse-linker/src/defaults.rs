//! Platform-specific default variables, seeded into the evaluator's
//! environment before a script is parsed. Scripts may freely override these
//! with an explicit assignment.

use membrowse_common::Platform;

use crate::eval::ParseEnv;

pub fn seed(env: &mut ParseEnv, platform: Platform) {
    match platform {
        Platform::Esp32 => {
            env.set_int("CONFIG_ESP32_SPIRAM_SIZE", 0);
            env.set_int("CONFIG_PARTITION_TABLE_OFFSET", 0x8000);
        }
        Platform::Esp8266 => {
            env.set_int("FLASH_SIZE", 0x0010_0000);
        }
        Platform::Stm32 => {
            env.set_int("_flash_size", 0x0010_0000);
            env.set_int("_ram_size", 0x0002_0000);
        }
        Platform::Nrf => {
            env.set_int("_sd_size", 0);
            env.set_int("_fs_size", 65536);
        }
        Platform::Samd => {
            env.set_int("_etext", 0x0001_0000);
            env.set_int("_codesize", 0x0001_0000);
            env.set_int("BootSize", 0x2000);
        }
        Platform::MimxRt => {
            env.set_int("MICROPY_HW_FLASH_SIZE", 0x0080_0000);
        }
        Platform::Qemu => {
            env.set_int("ROM_BASE", 0x8000_0000);
            env.set_int("ROM_SIZE", 0x0040_0000);
            env.set_int("RAM_BASE", 0x8040_0000);
            env.set_int("RAM_SIZE", 0x0020_0000);
        }
        Platform::Renesas | Platform::Rp2 | Platform::Unix | Platform::Unknown => {}
    }
}
