use core::panic::PanicInfo;
use defmt::error;

use crate::status;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    // Interrupt counts show which handler was last making progress.
    error!(
        "PANIC: {} after {}",
        defmt::Display2Format(info),
        status::snapshot()
    );
    cortex_m::asm::udf();
}
