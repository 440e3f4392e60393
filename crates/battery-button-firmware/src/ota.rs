//! Writes uploaded images into the inactive OTA slot.
//!
//! Data is collected into whole flash sectors before it is written, and the
//! partition table is re-read for each sector so no borrow of the flash has
//! to outlive a single call.

use battery_button_core::update::FirmwareSink;
use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::ota::OtaImageState;
use esp_bootloader_esp_idf::ota_updater::OtaUpdater;
use esp_bootloader_esp_idf::partitions::{self, PARTITION_TABLE_MAX_LEN};
use esp_storage::FlashStorage;
use log::{debug, info};
use thiserror_no_std::Error;

const SECTOR_SIZE: usize = 4096;
/// First byte of every ESP application image.
const IMAGE_MAGIC: u8 = 0xE9;

#[derive(Error, Debug)]
pub enum OtaError {
    #[error("partition table error: {0:?}")]
    Partition(partitions::Error),
    #[error("flash write failed")]
    Flash,
    #[error("image of {len} bytes exceeds the {capacity} byte slot")]
    TooLarge { len: usize, capacity: usize },
    #[error("upload is not an application image")]
    NotAnImage,
    #[error("expected data at offset {expected}, got {offset}")]
    OutOfOrder { expected: usize, offset: usize },
    #[error("no update in progress")]
    NotStarted,
}

impl From<partitions::Error> for OtaError {
    fn from(e: partitions::Error) -> Self {
        Self::Partition(e)
    }
}

pub struct OtaSink {
    flash: FlashStorage<'static>,
    table: [u8; PARTITION_TABLE_MAX_LEN],
    sector: [u8; SECTOR_SIZE],
    /// Bytes in `sector`
    buffered: usize,
    /// Bytes already written to flash
    flushed: usize,
    expected_len: Option<usize>,
}

impl OtaSink {
    pub fn new(flash: FlashStorage<'static>) -> Self {
        Self {
            flash,
            table: [0; PARTITION_TABLE_MAX_LEN],
            sector: [0; SECTOR_SIZE],
            buffered: 0,
            flushed: 0,
            expected_len: None,
        }
    }

    fn flush_sector(&mut self) -> Result<(), OtaError> {
        if self.buffered == 0 {
            return Ok(());
        }
        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.table)?;
        let (mut slot, _) = ota.next_partition()?;
        slot.write(self.flushed as u32, &self.sector[..self.buffered])
            .map_err(|_| OtaError::Flash)?;

        self.flushed += self.buffered;
        self.buffered = 0;
        debug!("OTA: {} bytes written", self.flushed);
        Ok(())
    }
}

impl FirmwareSink for OtaSink {
    type Error = OtaError;

    fn begin(&mut self, image_len: usize) -> Result<(), Self::Error> {
        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.table)?;
        let (slot, subtype) = ota.next_partition()?;
        let capacity = slot.capacity();
        if image_len > capacity {
            return Err(OtaError::TooLarge {
                len: image_len,
                capacity,
            });
        }

        info!("OTA: writing {} bytes to {:?}", image_len, subtype);
        self.buffered = 0;
        self.flushed = 0;
        self.expected_len = Some(image_len);
        Ok(())
    }

    fn write(&mut self, offset: usize, mut chunk: &[u8]) -> Result<(), Self::Error> {
        if self.expected_len.is_none() {
            return Err(OtaError::NotStarted);
        }
        let expected = self.flushed + self.buffered;
        if offset != expected {
            return Err(OtaError::OutOfOrder { expected, offset });
        }
        if offset == 0 && chunk.first() != Some(&IMAGE_MAGIC) {
            return Err(OtaError::NotAnImage);
        }

        while !chunk.is_empty() {
            let n = chunk.len().min(SECTOR_SIZE - self.buffered);
            self.sector[self.buffered..self.buffered + n].copy_from_slice(&chunk[..n]);
            self.buffered += n;
            chunk = &chunk[n..];
            if self.buffered == SECTOR_SIZE {
                self.flush_sector()?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        let expected = self.expected_len.take().ok_or(OtaError::NotStarted)?;
        self.flush_sector()?;
        if self.flushed != expected {
            return Err(OtaError::OutOfOrder {
                expected,
                offset: self.flushed,
            });
        }

        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.table)?;
        ota.activate_next_partition()?;
        ota.set_current_ota_state(OtaImageState::New)?;
        info!("OTA: new image activated");
        Ok(())
    }
}
