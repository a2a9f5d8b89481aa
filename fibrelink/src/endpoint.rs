//! Addressable endpoint descriptors
//!
//! A node exposes a fixed tree of properties, functions and nested objects.
//! The tree is declared as static member lists and flattened into the
//! [`Registry`](crate::registry::Registry) at startup; each leaf is reachable
//! through its table index afterwards.

use crate::sink::Sink;

/// Host access granted to a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    Read,
    ReadWrite,
}

impl Access {
    pub const fn as_str(self) -> &'static str {
        match self {
            Access::Read => "r",
            Access::ReadWrite => "rw",
        }
    }
}

/// An endpoint request handler
///
/// `request` is the raw body between the envelope fields and the trailer; the
/// handler writes 0 or more response bytes into `response`, which is bounded by
/// the length the peer asked for and the local transmit buffer. Handlers run in
/// the link's single consumer context and must not block.
pub trait Handler: Sync {
    fn handle(&self, request: &[u8], response: &mut dyn Sink);
}

/// One declared member of the endpoint tree
///
/// The tagged representation allows exhaustive matching and keeps the table
/// free of vtable indirection for non-leaf entries. Names become JSON schema
/// fields verbatim and must not contain quotes or backslashes.
pub enum Member<'a> {
    /// A value snapshot or get/set pair, depending on `access`
    Property {
        name: &'a str,
        ty: &'a str,
        access: Access,
        handler: &'a dyn Handler,
    },
    /// A callable with positional arguments packed in the request body
    Function {
        name: &'a str,
        handler: &'a dyn Handler,
    },
    /// A named subtree; contributes an entry of its own, then its members
    /// depth-first
    Object {
        name: &'a str,
        members: &'a [Member<'a>],
    },
}
