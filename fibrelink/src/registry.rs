//! The endpoint registry and its JSON self-description
//!
//! Built once at startup from declarative member lists and read-only
//! thereafter. Ids are assigned in depth-first declaration order, starting at 1;
//! index 0 is the reserved self-description endpoint that serves the JSON
//! document below. The CRC16 of that document is the schema CRC: it changes
//! whenever the tree's shape changes and thereby invalidates every previously
//! issued [`EndpointRef`].
//!
//! Document format: an array of `{"name":…,"id":…,"type":…,"access":…}`, one
//! entry per table slot, in table order.

use core::fmt::Write;

use heapless::Vec;

use crate::core::EndpointId;
use crate::endpoint::{Access, Handler, Member};
use crate::sink::{CrcSink, OffsetSink, Sink, SinkWrite};

/// A capability token addressing one endpoint of a specific schema revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointRef {
    pub endpoint_id: EndpointId,
    pub schema_crc: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// The declared tree has more leaves than the table can hold
    TableFull,
}

struct Entry<'a> {
    name: &'a str,
    ty: &'a str,
    access: Access,
    handler: Option<&'a dyn Handler>,
}

/// Read-only view the dispatcher needs; implemented by [`Registry`]
pub trait Endpoints: Sync {
    fn count(&self) -> usize;
    fn schema_crc(&self) -> u16;
    fn handler(&self, index: usize) -> Option<&dyn Handler>;
    fn write_schema(&self, out: &mut dyn Sink);

    /// Serves a self-description request: 4-byte LE offset, then the document
    ///
    /// Streaming through an offset-skipping sink lets peers page through
    /// documents larger than one packet.
    fn handle_descriptor(&self, request: &[u8], response: &mut dyn Sink) {
        if request.len() < 4 {
            return;
        }
        let offset = u32::from_le_bytes([request[0], request[1], request[2], request[3]]);
        let mut out = OffsetSink::new(response, offset as usize);
        self.write_schema(&mut out);
    }
}

/// Flat endpoint table of at most `N` entries, including the reserved slot 0
pub struct Registry<'a, const N: usize> {
    entries: Vec<Entry<'a>, N>,
    schema_crc: u16,
}

impl<'a, const N: usize> Registry<'a, N> {
    pub fn new(members: &'a [Member<'a>]) -> Result<Self, RegistryError> {
        let mut registry = Self {
            entries: Vec::new(),
            schema_crc: 0,
        };
        registry.push(Entry {
            name: "",
            ty: "json",
            access: Access::Read,
            handler: None,
        })?;
        registry.flatten(members)?;

        let mut crc = CrcSink::default();
        registry.write_schema(&mut crc);
        registry.schema_crc = crc.get();
        Ok(registry)
    }

    fn flatten(&mut self, members: &'a [Member<'a>]) -> Result<(), RegistryError> {
        for member in members {
            match member {
                Member::Property {
                    name,
                    ty,
                    access,
                    handler,
                } => self.push(Entry {
                    name,
                    ty,
                    access: *access,
                    handler: Some(*handler),
                })?,
                Member::Function { name, handler } => self.push(Entry {
                    name,
                    ty: "function",
                    access: Access::Read,
                    handler: Some(*handler),
                })?,
                Member::Object { name, members } => {
                    self.push(Entry {
                        name,
                        ty: "object",
                        access: Access::Read,
                        handler: None,
                    })?;
                    self.flatten(members)?;
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, entry: Entry<'a>) -> Result<(), RegistryError> {
        self.entries.push(entry).map_err(|_| RegistryError::TableFull)
    }

    /// Validity check for previously issued references
    ///
    /// A reference goes stale when the schema CRC changes, e.g. after a
    /// firmware update reshapes the endpoint tree.
    pub fn is_ref_valid(&self, endpoint_ref: EndpointRef) -> bool {
        endpoint_ref.schema_crc == self.schema_crc
            && usize::from(endpoint_ref.endpoint_id) < self.entries.len()
    }

    /// Issues a reference to the endpoint at `index` under the current schema
    pub fn make_ref(&self, index: usize) -> Option<EndpointRef> {
        if index >= self.entries.len() {
            return None;
        }
        Some(EndpointRef {
            endpoint_id: EndpointId::new(index as u16)?,
            schema_crc: self.schema_crc,
        })
    }
}

impl<const N: usize> Endpoints for Registry<'_, N> {
    fn count(&self) -> usize {
        self.entries.len()
    }

    fn schema_crc(&self) -> u16 {
        self.schema_crc
    }

    fn handler(&self, index: usize) -> Option<&dyn Handler> {
        self.entries.get(index).and_then(|entry| entry.handler)
    }

    fn write_schema(&self, out: &mut dyn Sink) {
        let mut w = SinkWrite(out);
        // sinks are infallible, so the fmt plumbing is too
        let _ = w.write_str("[");
        for (id, entry) in self.entries.iter().enumerate() {
            if id != 0 {
                let _ = w.write_str(",");
            }
            let _ = write!(
                w,
                "{{\"name\":\"{}\",\"id\":{},\"type\":\"{}\",\"access\":\"{}\"}}",
                entry.name,
                id,
                entry.ty,
                entry.access.as_str()
            );
        }
        let _ = w.write_str("]");
    }
}
