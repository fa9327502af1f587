//! `skip` jumps forward without decoding, and `seek_to_start` rewinds a
//! seekable stream back to the first bucket.

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

#[test]
fn skip_then_seek_to_start_round_trips() {
    let registry = registry();
    let mut writer = Writer::with_registry(Vec::new(), registry.clone());

    for i in 0..8 {
        let mut event = Event::with_registry(registry.clone());
        event.add_entry("Particle", &Particle { pdg: 11 + i, ..Default::default() });
        writer.push(&mut event).unwrap();
    }
    writer.flush().unwrap();

    let reader = Reader::with_registry(Cursor::new(writer.into_inner()), registry);

    reader.skip(7).unwrap();
    let last = reader.next().unwrap().expect("8th event");
    assert_eq!(
        last.to_string(),
        "---------- TAG: Particle ----------\nID: 1\nEntry type: proio.model.example.Particle\npdg: 18\n\n"
    );

    reader.seek_to_start().unwrap();
    let first = reader.next().unwrap().expect("1st event");
    assert_eq!(
        first.to_string(),
        "---------- TAG: Particle ----------\nID: 1\nEntry type: proio.model.example.Particle\npdg: 11\n\n"
    );
}
