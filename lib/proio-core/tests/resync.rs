//! Garbage bytes ahead of the first valid magic prefix are skipped, not
//! fatal: the reader signals it resynchronized and still yields the exact
//! event sequence a clean stream would have produced.

use std::io::Cursor;

use proio_core::{DescriptorRegistry, Event, Reader, Writer};
use proio_model_example::Particle;

fn registry() -> DescriptorRegistry {
    let registry = DescriptorRegistry::new();
    registry
        .register_file_descriptor_set(proio_model_example::FILE_DESCRIPTOR_SET_BYTES)
        .unwrap();
    registry
}

fn pdgs_in_order(reader: &Reader<Cursor<Vec<u8>>>) -> Vec<i32> {
    let mut pdgs = Vec::new();
    while let Some(event) = reader.next().unwrap() {
        let id = event.tagged_entries("Particle")[0];
        let handle = event.get_entry(id).unwrap();
        let msg = handle.lock().unwrap();
        pdgs.push(msg.get_field_by_number(3).unwrap().as_i32().unwrap());
    }
    pdgs
}

#[test]
fn garbage_prefix_is_skipped_and_resync_is_signaled_once() {
    let registry = registry();
    let mut writer = Writer::with_registry(Vec::new(), registry.clone());
    for pdg in [11, 12, 13] {
        let mut event = Event::with_registry(registry.clone());
        event.add_entry(
            "Particle",
            &Particle {
                pdg,
                ..Default::default()
            },
        );
        writer.push(&mut event).unwrap();
    }
    writer.flush().unwrap();
    let clean = writer.into_inner();

    // None of these bytes contain the magic prefix (0xE1 0xC1 followed by
    // 14 zero bytes), so the reader has to scan past all of them byte by
    // byte before it finds a real bucket header.
    let mut prepended = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01, 0x02];
    prepended.extend_from_slice(&clean);

    let clean_reader = Reader::with_registry(Cursor::new(clean), registry.clone());
    let clean_pdgs = pdgs_in_order(&clean_reader);

    let resynced_reader = Reader::with_registry(Cursor::new(prepended), registry);
    assert!(!resynced_reader.resynchronized());
    let resynced_pdgs = pdgs_in_order(&resynced_reader);

    assert_eq!(resynced_pdgs, clean_pdgs);
    assert!(resynced_reader.resynchronized());
}
