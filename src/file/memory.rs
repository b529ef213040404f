use std::borrow::Cow;

use super::{checked_range, Backend};
use crate::Result;

/// Input file backed by Memory
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Create a new memory backend
    ///
    /// ## Arguments
    /// * 'data' - The data buffer to consume
    #[must_use]
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        let range = checked_range(offset, len, self.size())?;
        Ok(Cow::Borrowed(&self.data[range]))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error::TruncatedInput;

    #[test]
    fn memory() {
        let mut data = vec![0xCC_u8; 1048];
        data[10] = 0xBB;
        data[11] = 0xBB;
        data[12] = 0xBB;
        data[13] = 0xBB;
        data[14] = 0xBB;

        let memory = Memory::new(data);

        assert_eq!(memory.size(), 1048);
        assert_eq!(memory.read(0, 1).unwrap()[0], 0xCC);
        assert_eq!(memory.read(42, 1).unwrap()[0], 0xCC);
        assert_eq!(
            memory.read(10, 5).unwrap().as_ref(),
            &[0xBB, 0xBB, 0xBB, 0xBB, 0xBB]
        );
        assert!(matches!(memory.read(10, 5).unwrap(), Cow::Borrowed(_)));

        if memory.read(u64::from(u32::MAX), u32::MAX as usize).is_ok() {
            panic!("This should not work!")
        }

        if memory.read(0, 2048).is_ok() {
            panic!("This should not work!")
        }
    }

    #[test]
    fn test_memory_empty_buffer() {
        let memory = Memory::new(vec![]);

        assert_eq!(memory.size(), 0);

        assert!(memory.read(0, 1).is_err());
        assert!(memory.read(1, 0).is_err());
        let empty_slice: &[u8] = &[];
        assert_eq!(memory.read(0, 0).unwrap().as_ref(), empty_slice);
    }

    #[test]
    fn test_memory_single_byte() {
        let memory = Memory::new(vec![0x42]);

        assert_eq!(memory.size(), 1);

        assert_eq!(memory.read(0, 1).unwrap().as_ref(), &[0x42]);
        assert!(memory.read(0, 2).is_err());
        assert!(memory.read(1, 1).is_err());
        let empty_slice: &[u8] = &[];
        assert_eq!(memory.read(1, 0).unwrap().as_ref(), empty_slice);
    }

    #[test]
    fn test_memory_offset_overflow() {
        let memory = Memory::new(vec![0x00; 100]);

        let result = memory.read(u64::MAX, 1);
        assert!(matches!(result.unwrap_err(), TruncatedInput { .. }));

        let result = memory.read(100, 1);
        assert!(matches!(
            result.unwrap_err(),
            TruncatedInput {
                offset: 100,
                needed: 1,
                available: 0
            }
        ));

        let result = memory.read(99, 2);
        assert!(matches!(
            result.unwrap_err(),
            TruncatedInput {
                offset: 99,
                needed: 2,
                available: 1
            }
        ));
    }
}
