/*! PRACH buffers and their slot-indexed repository.

PRACH preambles arrive on their own eAxC streams and land in
dedicated buffers instead of the slot resource grid. A long-format
preamble is an 839-sample sequence over one or more OFDM symbols; the
short formats use 139-sample sequences over up to twelve symbols.

Some Radio Units always stamp symbolId 0 on long-format PRACH
User-Plane messages regardless of what the C-Plane requested; the
context can be built with a start-symbol override so those messages
still land on the right preamble symbol.
*/
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::Complex;
use crate::bitmap::BitMap;
use crate::cplane::repository_index;
use crate::slot::SlotPoint;

/// Sequence length of the long preamble formats.
pub const LONG_SEQUENCE_LENGTH: usize = 839;

/// Sequence length of the short preamble formats.
pub const SHORT_SEQUENCE_LENGTH: usize = 139;

/// PRACH preamble format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrachFormat {
    /// Long format 0 (1.25 kHz, one repetition).
    Format0,
    /// Long format 1.
    Format1,
    /// Long format 2.
    Format2,
    /// Long format 3.
    Format3,
    /// Short format A1.
    A1,
    /// Short format A2.
    A2,
    /// Short format A3.
    A3,
    /// Short format B1.
    B1,
    /// Short format B4.
    B4,
    /// Short format C0.
    C0,
    /// Short format C2.
    C2,
}

impl PrachFormat {
    /// True for the 839-sample long formats.
    pub fn is_long(&self) -> bool {
        matches!(
            self,
            PrachFormat::Format0 | PrachFormat::Format1 | PrachFormat::Format2 | PrachFormat::Format3
        )
    }

    /// Preamble sequence length in resource elements.
    pub fn sequence_length(&self) -> usize {
        if self.is_long() {
            LONG_SEQUENCE_LENGTH
        } else {
            SHORT_SEQUENCE_LENGTH
        }
    }

    /// Number of OFDM symbols the preamble occupies.
    pub fn nof_symbols(&self) -> usize {
        match self {
            PrachFormat::Format0 => 1,
            PrachFormat::Format1 => 2,
            PrachFormat::Format2 => 4,
            PrachFormat::Format3 => 4,
            PrachFormat::A1 => 2,
            PrachFormat::A2 => 4,
            PrachFormat::A3 => 6,
            PrachFormat::B1 => 2,
            PrachFormat::B4 => 12,
            PrachFormat::C0 => 1,
            PrachFormat::C2 => 4,
        }
    }
}

/// Sample storage for one PRACH occasion.
pub struct PrachBuffer {
    max_ports: usize,
    nof_symbols: usize,
    sequence_length: usize,
    data: Vec<Complex>,
}

impl PrachBuffer {
    /// Creates an all-zero buffer sized for `format`.
    pub fn new(format: PrachFormat, max_ports: usize) -> Self {
        let nof_symbols = format.nof_symbols();
        let sequence_length = format.sequence_length();
        Self {
            max_ports,
            nof_symbols,
            sequence_length,
            data: vec![Complex::default(); max_ports * nof_symbols * sequence_length],
        }
    }

    /// Maximum number of ports this buffer holds.
    pub fn max_ports(&self) -> usize {
        self.max_ports
    }

    /// Number of preamble symbols.
    pub fn nof_symbols(&self) -> usize {
        self.nof_symbols
    }

    /// Preamble sequence length.
    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn offset(&self, port: usize, symbol: usize) -> usize {
        debug_assert!(port < self.max_ports && symbol < self.nof_symbols);
        (port * self.nof_symbols + symbol) * self.sequence_length
    }

    /// Copies `iq` into the given port and preamble symbol.
    pub fn write(&mut self, port: usize, symbol: usize, re_start: usize, iq: &[Complex]) {
        let base = self.offset(port, symbol) + re_start;
        self.data[base..base + iq.len()].copy_from_slice(iq);
    }

    /// Read view of one port and preamble symbol.
    pub fn view(&self, port: usize, symbol: usize) -> &[Complex] {
        let base = self.offset(port, symbol);
        &self.data[base..base + self.sequence_length]
    }
}

/// Reference-counted handle to a [`PrachBuffer`].
pub type SharedPrachBuffer = Arc<Mutex<PrachBuffer>>;

/// Creates a shared all-zero PRACH buffer.
pub fn new_shared_prach_buffer(format: PrachFormat, max_ports: usize) -> SharedPrachBuffer {
    Arc::new(Mutex::new(PrachBuffer::new(format, max_ports)))
}

/// Identifies the PRACH occasion a buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrachBufferContext {
    /// Slot of the occasion.
    pub slot: SlotPoint,
    /// Radio sector identifier.
    pub sector: u32,
    /// Preamble format.
    pub format: PrachFormat,
    /// Number of ports requested.
    pub nof_ports: usize,
    /// OFDM symbol index marking the start of the preamble.
    pub start_symbol: u8,
}

/// One slot's PRACH reception state.
struct PrachContext {
    context: PrachBufferContext,
    buffer: SharedPrachBuffer,
    /// REs written, indexed by preamble symbol then port.
    re_written: Vec<Vec<BitMap>>,
    nof_symbols: usize,
    start_symbol: u8,
}

impl PrachContext {
    fn new(
        context: PrachBufferContext,
        buffer: SharedPrachBuffer,
        start_symbol_override: Option<u8>,
    ) -> Self {
        let format = context.format;
        let (max_ports, sequence_length) = {
            let b = buffer.lock().unwrap();
            (b.max_ports(), b.sequence_length())
        };
        Self {
            start_symbol: start_symbol_override.unwrap_or(context.start_symbol),
            context,
            buffer,
            re_written: (0..format.nof_symbols())
                .map(|_| (0..max_ports).map(|_| BitMap::new(sequence_length)).collect())
                .collect(),
            nof_symbols: format.nof_symbols(),
        }
    }

    fn write(&mut self, port: usize, symbol: usize, re_start: usize, iq: &[Complex]) {
        let start = usize::from(self.start_symbol);
        let local = if self.context.format.is_long() {
            // Some RUs always send symbolId 0 for long formats,
            // ignoring the C-Plane start symbol.
            if symbol >= start { symbol - start } else { symbol }
        } else {
            match symbol.checked_sub(start) {
                Some(s) => s,
                None => {
                    warn!("PRACH symbol '{symbol}' below start symbol '{start}'");
                    return;
                }
            }
        };
        if local >= self.nof_symbols {
            warn!("PRACH symbol index '{local}' out of range");
            return;
        }
        // Skip writing if the given port does not fit in the buffer.
        if port >= self.re_written[local].len() {
            return;
        }
        // U-Plane messages carry whole PRBs; the preamble sequence is
        // not a PRB multiple, so the tail of the last PRB is padding.
        let seq_len = self.re_written[local][port].len();
        if re_start >= seq_len {
            return;
        }
        let take = iq.len().min(seq_len - re_start);
        self.buffer
            .lock()
            .unwrap()
            .write(port, local, re_start, &iq[..take]);
        self.re_written[local][port].fill(re_start, re_start + take);
    }

    fn is_complete(&self) -> bool {
        self.re_written
            .iter()
            .all(|symbol| symbol.iter().all(|port| port.all()))
    }
}

/// A PRACH buffer popped out of the repository.
pub struct PoppedPrachBuffer {
    /// The occasion the buffer belongs to.
    pub context: PrachBufferContext,
    /// The buffer itself.
    pub buffer: SharedPrachBuffer,
}

struct PendingPrachAdd {
    context: PrachBufferContext,
    buffer: SharedPrachBuffer,
    start_symbol_override: Option<u8>,
}

/// Slot-indexed repository of PRACH contexts, one occasion per slot.
pub struct PrachContextRepository {
    pending: Mutex<VecDeque<PendingPrachAdd>>,
    pending_capacity: usize,
    entries: Mutex<Vec<Option<PrachContext>>>,
}

impl PrachContextRepository {
    /// Creates a repository of the given size (see
    /// [`crate::cplane::repository_size`]).
    pub fn new(size: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(size)),
            pending_capacity: size,
            entries: Mutex::new((0..size).map(|_| None).collect()),
        }
    }

    /// Enqueues binding `buffer` to the occasion's slot.
    ///
    /// `start_symbol_override` tolerates RUs that stamp symbolId 0 on
    /// long-format messages; `None` trusts the context start symbol.
    pub fn add(
        &self,
        context: PrachBufferContext,
        buffer: SharedPrachBuffer,
        start_symbol_override: Option<u8>,
    ) {
        let mut pending = self.pending.lock().unwrap();
        if pending.len() >= self.pending_capacity {
            warn!("Failed to enqueue PRACH context for slot '{}'", context.slot);
            return;
        }
        pending.push_back(PendingPrachAdd {
            context,
            buffer,
            start_symbol_override,
        });
    }

    /// Executes the enqueued insertions.
    pub fn process_pending(&self) {
        loop {
            let task = { self.pending.lock().unwrap().pop_front() };
            let Some(task) = task else {
                return;
            };
            let mut entries = self.entries.lock().unwrap();
            let index = repository_index(task.context.slot, entries.len());
            entries[index] = Some(PrachContext::new(
                task.context,
                task.buffer,
                task.start_symbol_override,
            ));
        }
    }

    /// Writes REs into the PRACH buffer bound to `slot`.
    ///
    /// Returns false when no context is bound there.
    pub fn write(
        &self,
        slot: SlotPoint,
        port: usize,
        symbol: usize,
        re_start: usize,
        iq: &[Complex],
    ) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let index = repository_index(slot, entries.len());
        match &mut entries[index] {
            Some(entry) => {
                entry.write(port, symbol, re_start, iq);
                true
            }
            None => false,
        }
    }

    /// Pops the buffer for `slot` if every symbol and port is full.
    pub fn try_pop_complete(&self, slot: SlotPoint) -> Option<PoppedPrachBuffer> {
        let mut entries = self.entries.lock().unwrap();
        let index = repository_index(slot, entries.len());
        let complete = entries[index]
            .as_ref()
            .is_some_and(|entry| entry.is_complete());
        if !complete {
            return None;
        }
        entries[index].take().map(|entry| PoppedPrachBuffer {
            context: entry.context,
            buffer: entry.buffer,
        })
    }

    /// Unconditionally pops whatever is bound to `slot`.
    pub fn pop(&self, slot: SlotPoint) -> Option<PoppedPrachBuffer> {
        let mut entries = self.entries.lock().unwrap();
        let index = repository_index(slot, entries.len());
        entries[index].take().map(|entry| PoppedPrachBuffer {
            context: entry.context,
            buffer: entry.buffer,
        })
    }

    /// Clears every entry.
    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
        for entry in self.entries.lock().unwrap().iter_mut() {
            *entry = None;
        }
    }
}
