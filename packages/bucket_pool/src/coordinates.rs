/// Identifies a slot by the bucket it lives in and its byte offset within that bucket.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct SlotCoordinates {
    bucket_index: usize,
    offset: usize,
}

impl SlotCoordinates {
    #[must_use]
    pub(crate) fn from_parts(bucket_index: usize, offset: usize) -> Self {
        Self {
            bucket_index,
            offset,
        }
    }

    #[must_use]
    pub(crate) fn bucket_index(&self) -> usize {
        self.bucket_index
    }

    #[must_use]
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }
}
