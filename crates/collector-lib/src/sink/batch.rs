//! Cross-cycle document accumulation
//!
//! Documents pile up across poll cycles and are flushed in one bulk request
//! when either threshold is exceeded:
//! - more than `max_cycles` cycles offered since the last flush
//! - more than `max_documents` documents held

use crate::models::ObservabilityDocument;

/// Default cycle threshold (flush on the 11th cycle)
pub const DEFAULT_MAX_CYCLES: u32 = 10;

/// Default document threshold (flush at the 2001st document)
pub const DEFAULT_MAX_DOCUMENTS: usize = 2000;

/// Thresholds deciding when a batch is due. Both comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub max_cycles: u32,
    pub max_documents: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_cycles: DEFAULT_MAX_CYCLES,
            max_documents: DEFAULT_MAX_DOCUMENTS,
        }
    }
}

impl FlushPolicy {
    pub fn is_due(&self, cycles: u32, documents: usize) -> bool {
        cycles > self.max_cycles || documents > self.max_documents
    }
}

/// Ordered documents plus the number of cycles since the last flush.
///
/// Owned by the single poll loop; not shared across tasks.
#[derive(Debug, Default)]
pub struct Batch {
    documents: Vec<ObservabilityDocument>,
    cycles: u32,
    policy: FlushPolicy,
}

impl Batch {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            documents: Vec::new(),
            cycles: 0,
            policy,
        }
    }

    /// Append one cycle's documents in order and count the cycle.
    /// Returns true when the batch must be flushed.
    pub fn offer(&mut self, documents: Vec<ObservabilityDocument>) -> bool {
        self.documents.extend(documents);
        self.cycles += 1;
        self.is_flush_due()
    }

    pub fn is_flush_due(&self) -> bool {
        self.policy.is_due(self.cycles, self.documents.len())
    }

    /// Extract every held document and reset to an empty batch with a zero
    /// cycle counter. Call before starting delivery so documents from later
    /// cycles land in a fresh batch.
    pub fn take(&mut self) -> Vec<ObservabilityDocument> {
        let documents = std::mem::take(&mut self.documents);
        self.cycles = 0;
        documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }
}
