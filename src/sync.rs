// Pack synchronizer: resolves a `(room, pack name)` slot into a pack object,
// writes it back, deletes it. Writes are full replacements; the room-state
// protocol has no partial patch, so concurrent editors are last-write-wins.

use serde_json::{Map, Value};
use tracing::debug;

use crate::api::StickerGateway;
use crate::error::{Error, Result};
use crate::pack::Pack;

/// Reads and writes remote pack state through the gateway.
pub struct PackSynchronizer<'a, G> {
    gateway: &'a G,
}

impl<'a, G: StickerGateway> PackSynchronizer<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    /// Fetch the pack, or start a fresh one.
    ///
    /// A remote value that is absent or structurally incomplete counts as no
    /// pack at all: with `create_if_missing` a new empty pack named after the
    /// state key is returned, otherwise the call fails with
    /// [`Error::NotFound`]. Any other gateway failure propagates unchanged.
    pub fn resolve(&self, room_id: &str, name: &str, create_if_missing: bool) -> Result<Pack> {
        let existing = self
            .gateway
            .get_pack_state(room_id, name)?
            .as_ref()
            .and_then(Pack::from_state_value);

        match existing {
            Some(pack) => {
                debug!(room = room_id, pack = name, entries = pack.len(), "resolved existing pack");
                Ok(pack)
            }
            None if create_if_missing => {
                debug!(room = room_id, pack = name, "no usable remote pack, starting empty");
                Ok(Pack::new(name))
            }
            None => Err(Error::NotFound(format!("pack '{name}' in {room_id}"))),
        }
    }

    /// Write the full pack object to the remote slot, replacing whatever is
    /// there.
    pub fn persist(&self, room_id: &str, name: &str, pack: &Pack) -> Result<()> {
        self.gateway
            .put_pack_state(room_id, name, &pack.to_state_value())
    }

    /// Remove the pack. Deleting a pack that does not exist remotely is a
    /// no-op success; otherwise the slot is overwritten with an empty object,
    /// which the state protocol treats as removal.
    pub fn delete(&self, room_id: &str, name: &str) -> Result<()> {
        if self.gateway.get_pack_state(room_id, name)?.is_none() {
            return Ok(());
        }
        self.gateway
            .put_pack_state(room_id, name, &Value::Object(Map::new()))
    }
}
