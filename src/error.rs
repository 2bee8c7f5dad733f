/// Clock engine error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A software-managed gate never reached the requested state.
    GatingFailure,
    /// A trigger bit never self-cleared.
    TriggerTimeout,
    /// The hardware selector holds a code missing from the clock's parent table.
    InvalidSelectorReading,
    /// The requested rate (or desense offset) can't be produced within tolerance.
    InvalidRateRequest,
    /// The CCU policy engine stop/start handshake didn't complete.
    PolicyEngineStall,
    /// A PLL didn't report lock after reset.
    LockTimeout,
    /// Parent index out of range for this clock.
    InvalidParent,
    /// No clock with that name or handle.
    UnknownClock,
    /// The operation isn't offered by this kind of clock.
    Unsupported,
    /// A fixed-capacity table is full.
    RegistryFull,
    /// Walking the parent chain went deeper than the tree allows.
    TreeTooDeep,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
