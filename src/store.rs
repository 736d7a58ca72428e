use crate::gate::{Gate, GateId};

/// Store is an interface for a read-only view of gate definitions that evaluation runs against.
///
/// Ordinarily the only implementation is [crate::GateHierarchy], an immutable snapshot. Gate ids
/// are dense: every id in `0..gate_count()` resolves.
pub trait Store {
    /// Retrieve the gate named `gate_name`, ignoring case.
    fn gate(&self, gate_name: &str) -> Option<&Gate>;

    /// Retrieve the gate with id `id`.
    fn gate_by_id(&self, id: GateId) -> Option<&Gate>;

    /// Number of gates in the store.
    fn gate_count(&self) -> usize;
}
