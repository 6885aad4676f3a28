//! Order packets, the composite order id, and handler descriptors.

use crossbeam::channel::Sender;

use crate::types::ShoalResult;

use super::JobContext;

/// Top bits of an order id address a worker.
pub const MAX_JOB_ID: u32 = 1024;

/// Low 22 bits of an order id are a per-worker ticket.
pub const MAX_ORDER_TICKET: u32 = 4_194_304;

const ORDER_TICKET_BITS: u32 = 22;

pub fn compose_order_id(job_id: u32, ticket: u32) -> u32 {
    (job_id << ORDER_TICKET_BITS) | ticket
}

pub fn order_id_job(order_id: u32) -> u32 {
    order_id >> ORDER_TICKET_BITS
}

pub fn order_id_ticket(order_id: u32) -> u32 {
    order_id & (MAX_ORDER_TICKET - 1)
}

/// What travels on a worker queue. `order_id == 0` means the request
/// is not tracked.
#[derive(Debug, Clone)]
pub struct OrderPacket {
    pub order: String,
    pub value: Vec<u8>,
    pub order_id: u32,
}

/// A native handler. An `Err` rolls the order's transaction back.
pub type RoutingFn = fn(&mut JobContext, &[u8]) -> ShoalResult;

/// Handler kinds. Scripted and dynamic-library handlers share the
/// native contract and dispatch through the engine seam registered on
/// the manager.
pub enum ProcessKind {
    Ptr(RoutingFn),
    Script { file: String, function: String },
    Lib { file: String, function: String },
}

pub struct EventProcess {
    pub kind: ProcessKind,
    pub weight: u32,
}

impl EventProcess {
    pub fn new_ptr(f: RoutingFn) -> Self {
        Self {
            kind: ProcessKind::Ptr(f),
            weight: 1,
        }
    }

    pub fn new_script(file: &str, function: &str) -> Self {
        Self {
            kind: ProcessKind::Script {
                file: file.to_string(),
                function: function.to_string(),
            },
            weight: 1,
        }
    }

    pub fn new_lib(file: &str, function: &str) -> Self {
        Self {
            kind: ProcessKind::Lib {
                file: file.to_string(),
                function: function.to_string(),
            },
            weight: 1,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// External execution engine for non-native handlers. The engine is
/// out of scope here; the core only defines the seam it calls.
pub trait ScriptEngine: Send + Sync {
    fn call(
        &self,
        file: &str,
        function: &str,
        ctx: &mut JobContext,
        value: &[u8],
    ) -> ShoalResult;
}

/// An order's home queue, as seen by routers.
#[derive(Clone)]
pub struct QueueRef {
    pub job_id: u32,
    pub sender: Sender<OrderPacket>,
}
