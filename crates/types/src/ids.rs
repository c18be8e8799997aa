//! Identifiers used to address navigation mesh entities.
//!
//! All references are arena indices scoped by the owning pylon. No raw
//! pointers are ever stored on mesh entities; a reference whose target was
//! removed is detected by the alive checks on the owning arena.

use std::fmt;

/// Opaque identifier of an agent. The navigation runtime never inspects it;
/// it only uses it to key per-agent bookkeeping such as edge in-use marks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct AgentId(u32);

impl AgentId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// Identifier of a top-level mesh unit (a pylon).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct PylonId(u32);

impl PylonId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PylonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pylon#{}", self.0)
    }
}

/// Reference to a polygon inside a pylon's mesh.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PolyRef {
    pylon: PylonId,
    index: u32,
}

impl PolyRef {
    pub const fn new(pylon: PylonId, index: u32) -> Self {
        Self { pylon, index }
    }

    pub fn pylon(&self) -> PylonId {
        self.pylon
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for PolyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/poly#{}", self.pylon, self.index)
    }
}

/// Reference to an edge inside a pylon's mesh. Cross-pylon edges are owned by
/// exactly one of the two pylons they connect.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EdgeRef {
    pylon: PylonId,
    index: u32,
}

impl EdgeRef {
    pub const fn new(pylon: PylonId, index: u32) -> Self {
        Self { pylon, index }
    }

    pub fn pylon(&self) -> PylonId {
        self.pylon
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/edge#{}", self.pylon, self.index)
    }
}

/// Identifier of a registered obstacle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ObstacleId(u32);

impl ObstacleId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

/// Stable handle to a scripted path object. Path-object edges store this
/// instead of an owning pointer to the scripted object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PathObjectId(u32);

impl PathObjectId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}
