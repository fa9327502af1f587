//! In-memory representation of one event: a bag of type-tagged entries,
//! reachable through an arbitrary number of named tags, plus per-event
//! metadata.
//!
//! An entry's payload is decoded lazily into a shared, mutable handle the
//! first time it's asked for. Callers are free to mutate that handle in
//! place; [`Event::flush_cache`] is what serializes those mutations back
//! into the entry's stored bytes, mirroring the way a caller can hang onto
//! a message returned from `GetEntry` and keep editing it until the event
//! is next pushed or printed.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use prost::Message as _;
use prost_reflect::{DynamicMessage, FileDescriptor, ReflectMessage, Value};

use crate::descriptor::DescriptorRegistry;
use crate::error::{DecodeFailure, Result};
use crate::wire;

type LiveHandle = Arc<Mutex<DynamicMessage>>;

struct EntryRecord {
    type_name: String,
    payload: Vec<u8>,
    /// `None` until first decoded; `Some(None)` means decoding was tried
    /// and failed (or the type is unknown); `Some(Some(handle))` is a live,
    /// shared, mutable decode.
    live: RefCell<Option<Option<LiveHandle>>>,
}

impl Clone for EntryRecord {
    fn clone(&self) -> Self {
        EntryRecord {
            type_name: self.type_name.clone(),
            payload: self.payload.clone(),
            live: RefCell::new(None),
        }
    }
}

/// One event's entries, tags, and metadata.
///
/// IDs are assigned starting at 1 and are unique within an event, not
/// across events — a freshly read or constructed event always starts its
/// own entries back at 1.
pub struct Event {
    registry: DescriptorRegistry,
    entries: IndexMap<u64, EntryRecord>,
    tags: BTreeMap<String, Vec<u64>>,
    entry_tags: HashMap<u64, BTreeSet<String>>,
    next_id: u64,
    /// Arbitrary event-level key/value metadata, propagated onto the
    /// bucket header the first time each key's value changes.
    pub metadata: BTreeMap<String, Vec<u8>>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    pub fn new() -> Self {
        Self::with_registry(DescriptorRegistry::global())
    }

    pub fn with_registry(registry: DescriptorRegistry) -> Self {
        Event {
            registry,
            entries: IndexMap::new(),
            tags: BTreeMap::new(),
            entry_tags: HashMap::new(),
            next_id: 1,
            metadata: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    /// Adds one entry, serializing `message` and registering its schema's
    /// file descriptor (and dependencies) so a reader without this crate's
    /// types can still decode it later. Returns the new entry's ID, and
    /// also tags it under `tag`.
    ///
    /// If `message` fails to encode, the entry is still created with an
    /// empty payload; `get_entry` on it will always return `None`.
    pub fn add_entry<T>(&mut self, tag: &str, message: &T) -> u64
    where
        T: prost::Message + ReflectMessage,
    {
        self.register_message_descriptor(message);
        let type_name = message.descriptor().full_name().to_string();
        let mut payload = Vec::with_capacity(message.encoded_len());
        if message.encode(&mut payload).is_err() {
            payload.clear();
        }
        self.insert_entry(tag, type_name, payload)
    }

    /// Adds several entries under the same tag; allocation order matches
    /// argument order.
    pub fn add_entries<T>(&mut self, tag: &str, messages: &[T]) -> Vec<u64>
    where
        T: prost::Message + ReflectMessage,
    {
        messages.iter().map(|m| self.add_entry(tag, m)).collect()
    }

    /// Adds an entry from an already-serialized payload plus its type name
    /// and a `FileDescriptorProto` describing it, for producers that don't
    /// have a compiled Rust type for the message they're forwarding.
    ///
    /// The entry is always created and given an ID, even when the
    /// descriptor bytes are malformed, so the caller can still name the
    /// (unreadable) entry; the `Result` only reports whether its schema
    /// was registered.
    pub fn add_serialized_entry(
        &mut self,
        tag: &str,
        payload: Vec<u8>,
        type_name: &str,
        file_descriptor_proto: &[u8],
    ) -> (u64, Result<()>) {
        let registration = self.registry.register_file(file_descriptor_proto);
        let id = self.insert_entry(tag, type_name.to_string(), payload);
        (id, registration)
    }

    fn register_message_descriptor<T: ReflectMessage>(&self, message: &T) {
        self.register_file_recursive(&message.descriptor().parent_file());
    }

    fn register_file_recursive(&self, file: &FileDescriptor) {
        if self.registry.has_file(file.name()) {
            return;
        }
        for dep in file.dependencies() {
            self.register_file_recursive(&dep);
        }
        let bytes = file.file_descriptor_proto().encode_to_vec();
        let _ = self.registry.register_file(&bytes);
    }

    fn insert_entry(&mut self, tag: &str, type_name: String, payload: Vec<u8>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            EntryRecord {
                type_name,
                payload,
                live: RefCell::new(None),
            },
        );
        if !tag.is_empty() {
            self.tag_entry(id, &[tag]);
        }
        id
    }

    /// Appends `id` to one or more tags' ordered sets, creating a tag if
    /// it doesn't already exist. Skips an id already present in a tag.
    pub fn tag_entry(&mut self, id: u64, tags: &[&str]) {
        for &tag in tags {
            let bucket = self.tags.entry(tag.to_string()).or_default();
            if !bucket.contains(&id) {
                bucket.push(id);
            }
            self.entry_tags.entry(id).or_default().insert(tag.to_string());
        }
    }

    /// Removes `id` from a single tag; a no-op if it wasn't there. Drops
    /// the tag entirely once it has no entries left.
    pub fn untag_entry(&mut self, id: u64, tag: &str) {
        if let Some(bucket) = self.tags.get_mut(tag) {
            bucket.retain(|&existing| existing != id);
            if bucket.is_empty() {
                self.tags.remove(tag);
            }
        }
        if let Some(tags) = self.entry_tags.get_mut(&id) {
            tags.remove(tag);
        }
    }

    /// Removes an entire tag, regardless of how many entries it holds.
    pub fn delete_tag(&mut self, tag: &str) {
        if let Some(ids) = self.tags.remove(tag) {
            for id in ids {
                if let Some(tags) = self.entry_tags.get_mut(&id) {
                    tags.remove(tag);
                }
            }
        }
    }

    /// Deletes an entry outright and purges it from every tag it appeared
    /// in. A no-op if `id` doesn't exist.
    pub fn remove_entry(&mut self, id: u64) {
        self.entries.shift_remove(&id);
        if let Some(tags) = self.entry_tags.remove(&id) {
            for tag in tags {
                if let Some(bucket) = self.tags.get_mut(&tag) {
                    bucket.retain(|&existing| existing != id);
                    if bucket.is_empty() {
                        self.tags.remove(&tag);
                    }
                }
            }
        }
    }

    /// Every entry ID currently tagged `tag`, in the order it was tagged,
    /// filtered to ids that still exist.
    pub fn tagged_entries(&self, tag: &str) -> Vec<u64> {
        self.tags
            .get(tag)
            .into_iter()
            .flatten()
            .copied()
            .filter(|id| self.entries.contains_key(id))
            .collect()
    }

    /// Every tag an entry carries, alphabetically.
    pub fn entry_tags(&self, id: u64) -> Vec<String> {
        self.entry_tags
            .get(&id)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every tag name in this event, alphabetically.
    pub fn tags(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    /// Every entry ID in this event, in insertion order.
    pub fn all_entries(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }

    /// Resolves `id`'s payload to a shared, mutable handle, decoding and
    /// caching it on first access. Returns `None` if the id doesn't exist,
    /// its type has no registered schema, or decoding fails.
    pub fn get_entry(&self, id: u64) -> Option<LiveHandle> {
        let rec = self.entries.get(&id)?;
        self.live_handle(rec)
    }

    /// The wire type name an entry was stored under, regardless of whether
    /// it could be decoded.
    pub fn entry_type(&self, id: u64) -> Option<&str> {
        self.entries.get(&id).map(|rec| rec.type_name.as_str())
    }

    fn live_handle(&self, rec: &EntryRecord) -> Option<LiveHandle> {
        if let Some(cached) = rec.live.borrow().as_ref() {
            return cached.clone();
        }
        let result = self
            .registry
            .lookup_by_type_name(&rec.type_name)
            .and_then(|descriptor| DynamicMessage::decode(descriptor, rec.payload.as_slice()).ok())
            .map(|msg| Arc::new(Mutex::new(msg)));
        *rec.live.borrow_mut() = Some(result.clone());
        result
    }

    /// Re-serializes every entry whose parsed handle has been obtained via
    /// `get_entry`, so in-place mutations of those handles are reflected
    /// the next time the event is written or rendered.
    pub fn flush_cache(&mut self) {
        for rec in self.entries.values_mut() {
            let handle = rec.live.borrow().clone().flatten();
            if let Some(handle) = handle {
                let msg = handle.lock().expect("entry handle mutex poisoned");
                rec.payload = msg.encode_to_vec();
            }
        }
    }

    /// An independent deep copy: further mutation of either event (tags,
    /// metadata, or payload bytes via `flush_cache`) leaves the other
    /// untouched. Live decode handles are not shared with the copy.
    pub fn copy(&self) -> Event {
        Event {
            registry: self.registry.clone(),
            entries: self.entries.clone(),
            tags: self.tags.clone(),
            entry_tags: self.entry_tags.clone(),
            next_id: self.next_id,
            metadata: self.metadata.clone(),
        }
    }

    pub(crate) fn to_proto(&self) -> wire::Event {
        let entry = self
            .entries
            .iter()
            .map(|(&id, rec)| wire::event::Entry {
                id,
                r#type: rec.type_name.clone(),
                payload: rec.payload.clone(),
            })
            .collect();
        let tag = self
            .tags
            .iter()
            .map(|(name, ids)| (name.clone(), wire::event::TagList { id: ids.clone() }))
            .collect();
        let metadata = self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let r#type = self
            .entries
            .values()
            .map(|rec| rec.type_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        wire::Event {
            entry,
            tag,
            metadata,
            r#type,
        }
    }

    pub(crate) fn from_proto(proto: wire::Event, registry: DescriptorRegistry) -> Self {
        let mut entries = IndexMap::new();
        let mut max_id = 0;
        for e in proto.entry {
            max_id = max_id.max(e.id);
            entries.insert(
                e.id,
                EntryRecord {
                    type_name: e.r#type,
                    payload: e.payload,
                    live: RefCell::new(None),
                },
            );
        }

        let mut tags = BTreeMap::new();
        let mut entry_tags: HashMap<u64, BTreeSet<String>> = HashMap::new();
        for (name, list) in proto.tag {
            for &id in &list.id {
                entry_tags.entry(id).or_default().insert(name.clone());
            }
            tags.insert(name, list.id);
        }

        let metadata = proto.metadata.into_iter().collect();

        Event {
            registry,
            entries,
            tags,
            entry_tags,
            next_id: max_id + 1,
            metadata,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (tag, ids) in &self.tags {
            writeln!(f, "---------- TAG: {} ----------", tag)?;
            for &id in ids {
                self.write_entry(f, id)?;
            }
        }
        Ok(())
    }
}

impl Event {
    fn write_entry(&self, f: &mut fmt::Formatter<'_>, id: u64) -> fmt::Result {
        writeln!(f, "ID: {}", id)?;
        let Some(rec) = self.entries.get(&id) else {
            return Ok(());
        };
        match self.live_handle(rec) {
            Some(handle) => {
                let msg = handle.lock().expect("entry handle mutex poisoned");
                writeln!(f, "Entry type: {}", rec.type_name)?;
                for line in render_fields(&msg) {
                    writeln!(f, "{}", line)?;
                }
                writeln!(f)?;
            }
            None => {
                let failure = DecodeFailure {
                    id,
                    type_name: rec.type_name.clone(),
                };
                writeln!(f, "{failure}")?;
            }
        }
        Ok(())
    }
}

fn render_fields(msg: &DynamicMessage) -> Vec<String> {
    let mut lines = Vec::new();
    for (field, value) in msg.fields() {
        match value {
            Value::List(items) => {
                for item in items {
                    lines.push(format!("{}: {}", field.name(), render_scalar(item)));
                }
            }
            other => lines.push(format!("{}: {}", field.name(), render_scalar(other))),
        }
    }
    lines
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Bool(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::U32(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::F32(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Bytes(v) => format!("{:?}", v.as_ref()),
        Value::EnumNumber(v) => v.to_string(),
        Value::Message(v) => format!("{:?}", v),
        _ => String::new(),
    }
}
