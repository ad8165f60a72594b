//! Aligned parameter streaming.
//!
//! A [`BufferRegion`] is one GPU uniform buffer plus a host staging copy. Every
//! frame the renderer opens a [`StreamWriter`] over it, appends plain-old-data
//! values at the head, aligns the head wherever a shader will bind a sub-range,
//! and flushes the written prefix to the GPU in a single upload.
//!
//! # Alignment
//!
//! Nothing is padded implicitly: `write` places each value exactly at the
//! head. Uniform sub-ranges bound by shaders must start at a multiple of the
//! device's minimum uniform offset alignment, which [`StreamWriter::write_block`]
//! takes care of. Layout inside a block (std140-style vec3 padding) is the
//! caller's job through [`StreamWriter::align_head`].

use bytemuck::Pod;
use thiserror::Error;

use crate::backend::*;

/// Errors raised while streaming into a [`BufferRegion`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("{requested} bytes at head {head} exceed region capacity {capacity}")]
    CapacityExceeded {
        head: u64,
        requested: u64,
        capacity: u64,
    },
    #[error("alignment boundary must be non-zero")]
    InvalidAlignment,
}

/// A sub-range of a [`BufferRegion`] written during the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ParamRange {
    /// Byte offset into the region.
    pub offset: u64,
    /// Size of the range in bytes.
    pub size: u64,
}

impl ParamRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the end offset (offset + size), saturating at `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// Whether two ranges share any byte
    pub fn overlaps(&self, other: &ParamRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// A GPU-visible uniform buffer written through [`StreamWriter`].
///
/// The capacity is fixed at creation from the device's largest bindable
/// uniform block and never grows.
#[derive(Debug)]
pub struct BufferRegion {
    buffer: GpuResource<BufferHandle>,
    staging: Vec<u8>,
    head: u64,
    alignment: u64,
}

impl BufferRegion {
    /// Allocate a region sized to the device limits.
    ///
    /// `capacity` overrides the size but is clamped to the device's maximum
    /// uniform block size.
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        queue: &ReleaseQueue,
        capacity: Option<u64>,
        label: &str,
    ) -> BackendResult<Self> {
        let limits = backend.limits();
        let alignment = limits.min_uniform_alignment.max(1);
        let capacity = capacity
            .map(|c| c.min(limits.max_uniform_block_size))
            .unwrap_or(limits.max_uniform_block_size);

        let handle = backend.create_buffer(&BufferDescriptor {
            label: Some(label.to_string()),
            size: capacity,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        log::debug!(
            "Created parameter region '{}' ({} bytes, {}-byte alignment)",
            label,
            capacity,
            alignment
        );

        Ok(Self {
            buffer: GpuResource::new(handle, queue),
            staging: vec![0; capacity as usize],
            head: 0,
            alignment,
        })
    }

    /// Open the exclusive write scope, resetting the head to the start.
    pub fn begin_write<'a, B: GraphicsBackend>(
        &'a mut self,
        backend: &'a mut B,
    ) -> StreamWriter<'a, B> {
        self.head = 0;
        StreamWriter {
            region: self,
            backend,
            flushed: false,
        }
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer.handle()
    }

    pub fn capacity(&self) -> u64 {
        self.staging.len() as u64
    }

    /// Minimum alignment of any sub-range bound for shader use
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Bytes written by the last write scope
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Host copy of the bytes in `range`
    pub fn bytes(&self, range: ParamRange) -> Option<&[u8]> {
        let end = range.offset.checked_add(range.size)?;
        let start = usize::try_from(range.offset).ok()?;
        let end = usize::try_from(end).ok()?;
        self.staging.get(start..end)
    }
}

/// Scoped writer over a [`BufferRegion`].
///
/// Holding the writer borrows the region mutably, so scopes can't overlap.
/// [`end_write`](Self::end_write) flushes `[0, head)` to the GPU; a writer
/// that is dropped early flushes as well.
pub struct StreamWriter<'a, B: GraphicsBackend> {
    region: &'a mut BufferRegion,
    backend: &'a mut B,
    flushed: bool,
}

impl<'a, B: GraphicsBackend> StreamWriter<'a, B> {
    pub fn head(&self) -> u64 {
        self.region.head
    }

    pub fn capacity(&self) -> u64 {
        self.region.capacity()
    }

    fn overflow(&self, requested: u64) -> StreamError {
        let error = StreamError::CapacityExceeded {
            head: self.region.head,
            requested,
            capacity: self.capacity(),
        };
        log::error!("Parameter region overflow: {}", error);
        error
    }

    /// Append raw bytes at the head, returning the offset they start at
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<u64, StreamError> {
        let start = self.region.head;
        let end = start + bytes.len() as u64;
        if end > self.capacity() {
            return Err(self.overflow(bytes.len() as u64));
        }
        self.region.staging[start as usize..end as usize].copy_from_slice(bytes);
        self.region.head = end;
        Ok(start)
    }

    /// Append `value` at the head with no padding, returning its offset
    pub fn write<T: Pod>(&mut self, value: &T) -> Result<u64, StreamError> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    /// Advance the head to the next multiple of `boundary` without writing.
    pub fn align_head(&mut self, boundary: u64) -> Result<u64, StreamError> {
        if boundary == 0 {
            log::error!("Parameter region aligned to a zero boundary");
            return Err(StreamError::InvalidAlignment);
        }
        let aligned = self.region.head.next_multiple_of(boundary);
        if aligned > self.capacity() {
            return Err(self.overflow(aligned - self.region.head));
        }
        self.region.head = aligned;
        Ok(aligned)
    }

    /// Align to the region's binding alignment, run `f`, and return the
    /// range it wrote.
    pub fn write_block<F>(&mut self, f: F) -> Result<ParamRange, StreamError>
    where
        F: FnOnce(&mut Self) -> Result<(), StreamError>,
    {
        let start = self.align_head(self.region.alignment)?;
        f(self)?;
        Ok(ParamRange::new(start, self.region.head - start))
    }

    /// Close the scope and upload the written bytes, returning their count
    pub fn end_write(mut self) -> u64 {
        self.flush();
        self.region.head
    }

    fn flush(&mut self) {
        if self.flushed {
            return;
        }
        self.flushed = true;
        let head = self.region.head as usize;
        if head > 0 {
            log::trace!("Flushing {} parameter bytes", head);
            self.backend
                .write_buffer(self.region.buffer(), 0, &self.region.staging[..head]);
        }
    }
}

impl<'a, B: GraphicsBackend> Drop for StreamWriter<'a, B> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use glam::{Mat4, Vec3};

    fn region(backend: &mut HeadlessBackend, capacity: u64) -> (BufferRegion, ReleaseQueue) {
        let queue = ReleaseQueue::new();
        let region = BufferRegion::new(backend, &queue, Some(capacity), "test").unwrap();
        (region, queue)
    }

    #[test]
    fn test_align_head_rounds_up_and_is_idempotent() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (mut region, _queue) = region(&mut backend, 1024);
        let mut writer = region.begin_write(&mut backend);

        writer.write(&[1u8; 3]).unwrap();
        assert_eq!(writer.align_head(16).unwrap(), 16);
        assert_eq!(writer.align_head(16).unwrap(), 16);
        writer.write(&7u32).unwrap();
        assert_eq!(writer.align_head(12).unwrap(), 24);
        assert_eq!(writer.align_head(1).unwrap(), 24);
    }

    #[test]
    fn test_zero_boundary_is_rejected() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (mut region, _queue) = region(&mut backend, 64);
        let mut writer = region.begin_write(&mut backend);
        assert_eq!(writer.align_head(0), Err(StreamError::InvalidAlignment));
    }

    #[test]
    fn test_consecutive_writes_are_packed() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (mut region, _queue) = region(&mut backend, 1024);
        let mut writer = region.begin_write(&mut backend);

        let position = writer.write(&Vec3::new(1.0, 2.0, 3.0)).unwrap();
        let count = writer.write(&5u32).unwrap();
        let matrix = writer.write(&Mat4::IDENTITY).unwrap();
        assert_eq!(position, 0);
        assert_eq!(count, 12);
        assert_eq!(matrix, 16);
        assert_eq!(writer.head(), 80);
    }

    #[test]
    fn test_overflow_fails_without_moving_head() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (mut region, _queue) = region(&mut backend, 16);
        let mut writer = region.begin_write(&mut backend);

        writer.write(&[0u32; 3]).unwrap();
        let err = writer.write(&Vec3::ZERO).unwrap_err();
        assert_eq!(
            err,
            StreamError::CapacityExceeded {
                head: 12,
                requested: 12,
                capacity: 16
            }
        );
        assert_eq!(writer.head(), 12);
        assert!(writer.align_head(32).is_err());
    }

    #[test]
    fn test_write_block_starts_on_binding_alignment() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (mut region, _queue) = region(&mut backend, 4096);
        let alignment = region.alignment();
        let mut writer = region.begin_write(&mut backend);

        writer.write(&1.0f32).unwrap();
        let block = writer
            .write_block(|w| w.write(&Mat4::IDENTITY).map(|_| ()))
            .unwrap();
        assert_eq!(block.offset, alignment);
        assert_eq!(block.size, 64);
    }

    #[test]
    fn test_end_write_flushes_prefix() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (mut region, _queue) = region(&mut backend, 256);
        let buffer = region.buffer();

        let mut writer = region.begin_write(&mut backend);
        writer.write(&0xAABBCCDDu32).unwrap();
        assert_eq!(writer.end_write(), 4);

        let data = backend.buffer_data(buffer).unwrap();
        assert_eq!(&data[..4], &0xAABBCCDDu32.to_ne_bytes());
        assert_eq!(region.head(), 4);
    }

    #[test]
    fn test_dropped_writer_still_flushes_once() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (mut region, _queue) = region(&mut backend, 256);
        {
            let mut writer = region.begin_write(&mut backend);
            writer.write(&1u32).unwrap();
        }
        let writes = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, crate::backend::headless::Command::WriteBuffer { .. }))
            .count();
        assert_eq!(writes, 1);
    }

    #[test]
    fn test_begin_write_resets_head() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (mut region, _queue) = region(&mut backend, 256);
        region.begin_write(&mut backend).write(&[0u8; 40]).unwrap();
        assert_eq!(region.head(), 40);

        let writer = region.begin_write(&mut backend);
        assert_eq!(writer.head(), 0);
    }

    #[test]
    fn test_capacity_clamped_to_device_limit() {
        let mut backend = HeadlessBackend::new(8, 8);
        let max = backend.limits().max_uniform_block_size;
        let (region, _queue) = region(&mut backend, max * 4);
        assert_eq!(region.capacity(), max);
    }

    #[test]
    fn test_out_of_range_bytes_are_none() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (mut region, _queue) = region(&mut backend, 512);
        let mut writer = region.begin_write(&mut backend);
        writer.write(&[5u8; 16]).unwrap();
        writer.end_write();

        assert_eq!(region.bytes(ParamRange::new(0, 16)), Some(&[5u8; 16][..]));
        assert_eq!(region.bytes(ParamRange::new(500, 64)), None);
        assert_eq!(region.bytes(ParamRange::new(u64::MAX, 2)), None);
        assert_eq!(region.bytes(ParamRange::new(8, u64::MAX)), None);

        let wrapping = ParamRange::new(u64::MAX, 2);
        assert_eq!(wrapping.end(), u64::MAX);
        assert!(!wrapping.overlaps(&ParamRange::new(0, 16)));
    }
}
