//! Serial console on COM1 (16550 UART)
//!
//! Where the driver's log records go on real hardware.

use core::fmt;
use spin::Mutex;
use x86_64::instructions::port::Port;

const COM1: u16 = 0x3F8;

// Register offsets from the base port
const DATA: u16 = 0; // DLAB=0
const INT_ENABLE: u16 = 1; // DLAB=0
const FIFO_CTRL: u16 = 2;
const LINE_CTRL: u16 = 3;
const MODEM_CTRL: u16 = 4;
const LINE_STATUS: u16 = 5;

const LINE_DLAB: u8 = 0x80;
const LINE_8N1: u8 = 0x03;
const STATUS_THR_EMPTY: u8 = 0x20;

/// Give up on a byte if the transmitter never drains
const TRANSMIT_SPINS: u32 = 100_000;

pub struct SerialPort {
    base: u16,
    initialized: bool,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        Self {
            base,
            initialized: false,
        }
    }

    fn port(&self, offset: u16) -> Port<u8> {
        Port::new(self.base + offset)
    }

    /// 115200 baud, 8N1, FIFOs on, interrupts off
    ///
    /// # Safety
    /// The caller must own the UART at `base`.
    unsafe fn init(&mut self) {
        self.port(INT_ENABLE).write(0x00);

        // Divisor 1 = 115200 baud
        self.port(LINE_CTRL).write(LINE_DLAB);
        self.port(DATA).write(0x01);
        self.port(INT_ENABLE).write(0x00);
        self.port(LINE_CTRL).write(LINE_8N1);

        self.port(FIFO_CTRL).write(0xC7);
        self.port(MODEM_CTRL).write(0x0B);
        self.initialized = true;
    }

    fn write_byte(&mut self, byte: u8) {
        if !self.initialized {
            return;
        }
        // SAFETY: `init` claimed the UART
        unsafe {
            let mut status = self.port(LINE_STATUS);
            for _ in 0..TRANSMIT_SPINS {
                if status.read() & STATUS_THR_EMPTY != 0 {
                    break;
                }
            }
            self.port(DATA).write(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

static SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));

/// Initialize COM1 (call once during boot)
///
/// # Safety
/// Nothing else may be driving COM1.
pub unsafe fn init() {
    SERIAL1.lock().init();
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::drivers::serial::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    // Output is best-effort; a lost log line is not worth a panic
    x86_64::instructions::interrupts::without_interrupts(|| {
        let _ = SERIAL1.lock().write_fmt(args);
    });
}
