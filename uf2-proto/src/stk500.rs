//! STK500v1 page-programming subset.
//!
//! Only the commands needed to stream pages into an Optiboot-style serial
//! bootloader are encoded:
//!
//! ```text
//! load address:  0x55 <addr lo> <addr hi>          then CRC_EOP, wait STK_OK
//! program page:  0x64 <size hi> <size lo> 'F' <page bytes...>  then CRC_EOP, wait STK_OK
//! ```
//!
//! The load address is little-endian and counts 16-bit words. The page size
//! is big-endian.

/// Synchronisation / end-of-packet byte. Every handshake starts with it.
pub const CRC_EOP: u8 = 0x20;

/// "Load address" command.
pub const STK_LOAD_ADDRESS: u8 = 0x55;

/// "Program page" command.
pub const STK_PROG_PAGE: u8 = 0x64;

/// Memory type selector for flash, terminates the program-page header.
pub const MEMTYPE_FLASH: u8 = b'F';

/// Bootloader reply: in sync.
pub const STK_INSYNC: u8 = 0x14;

/// Bootloader reply: command completed. This is the acknowledgment byte.
pub const STK_OK: u8 = 0x10;

/// Encoded length of a load-address command.
pub const LOAD_ADDRESS_LEN: usize = 3;

/// Encoded length of a program-page header.
pub const PROG_PAGE_HEADER_LEN: usize = 4;

/// Error type for command encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// Output buffer too small for the command.
    BufferTooSmall,
}

/// A command sent to the target before a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Set the word address for the next page.
    LoadAddress(u16),
    /// Announce a flash page write of the given size in bytes.
    ProgramPage(u16),
}

impl Command {
    /// Encoded length in bytes.
    #[inline]
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self {
            Command::LoadAddress(_) => LOAD_ADDRESS_LEN,
            Command::ProgramPage(_) => PROG_PAGE_HEADER_LEN,
        }
    }

    /// Encode the command into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(EncodeError::BufferTooSmall);
        }

        match *self {
            Command::LoadAddress(word_address) => {
                let [lo, hi] = word_address.to_le_bytes();
                buf[..len].copy_from_slice(&[STK_LOAD_ADDRESS, lo, hi]);
            }
            Command::ProgramPage(size) => {
                let [hi, lo] = size.to_be_bytes();
                buf[..len].copy_from_slice(&[STK_PROG_PAGE, hi, lo, MEMTYPE_FLASH]);
            }
        }

        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_address_little_endian() {
        let mut buf = [0u8; 8];
        let len = Command::LoadAddress(0x1234).encode(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x55, 0x34, 0x12]);
    }

    #[test]
    fn test_program_page_big_endian() {
        let mut buf = [0u8; 8];
        let len = Command::ProgramPage(128).encode(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x64, 0x00, 0x80, b'F']);
    }

    #[test]
    fn test_encode_buffer_too_small() {
        let mut buf = [0u8; 3];
        assert_eq!(
            Command::ProgramPage(128).encode(&mut buf),
            Err(EncodeError::BufferTooSmall)
        );
        assert_eq!(Command::LoadAddress(0).encode(&mut buf), Ok(3));
    }
}
