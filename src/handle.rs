//! Stable integer handles returned by `push_signal`/`push_control`
//! (spec.md §3). Signal and control handle spaces are disjoint; this is
//! enforced by making each a distinct newtype rather than sharing `usize`,
//! the same way the teacher keeps `Cpu`/`Proc`/`All` as distinct newtypes in
//! `config::target` instead of passing around bare integers.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub(crate) usize);

impl Handle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlHandle(pub(crate) usize);

impl ControlHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ControlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
