/// One rewritten line plus the timestamp it was moved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub line: String,
    pub timestamp_ms: i64,
}

/// Records delivered to a destination in one request, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub records: Vec<BatchRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct Batcher {
    capacity: usize,
    pending: Vec<BatchRecord>,
}

impl Batcher {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            pending: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers `record` and hands back a full batch once `capacity` is reached.
    pub fn accept(&mut self, record: BatchRecord) -> Option<Batch> {
        self.pending.push(record);
        if self.pending.len() >= self.capacity {
            return Some(self.take());
        }
        None
    }

    /// The trailing partial batch, if anything is still buffered.
    pub fn finish(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.take())
    }

    fn take(&mut self) -> Batch {
        Batch {
            records: std::mem::replace(&mut self.pending, Vec::with_capacity(self.capacity)),
        }
    }
}
