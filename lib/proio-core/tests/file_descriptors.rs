//! A bucket carries its entries' schemas with it: a reader whose registry
//! never saw `proio_model_example` can still decode its messages and count
//! exactly the distinct files that were actually written.

use std::io::Cursor;

use proio_core::{DescriptorRegistry, Event, Reader, Writer};
use proio_model_example::{Particle, SimHit};

fn producer_registry() -> DescriptorRegistry {
    let registry = DescriptorRegistry::new();
    registry
        .register_file_descriptor_set(proio_model_example::FILE_DESCRIPTOR_SET_BYTES)
        .unwrap();
    registry
}

#[test]
fn a_reader_with_no_prior_schema_can_still_decode_entries() {
    let mut writer = Writer::with_registry(Vec::new(), producer_registry());

    let mut first = Event::with_registry(producer_registry());
    first.add_entry("test", &Particle { pdg: 443, ..Default::default() });
    first.add_entry("test", &SimHit { particle: 1, energy: 2.5 });
    writer.push(&mut first).unwrap();

    let mut second = Event::with_registry(producer_registry());
    second.add_entry("test", &Particle { pdg: 7, ..Default::default() });
    second.add_entry("test", &SimHit { particle: 2, energy: 1.0 });
    writer.push(&mut second).unwrap();

    writer.flush().unwrap();
    let bytes = writer.into_inner();

    // A registry that has never linked proio_model_example's generated
    // types; everything it knows comes from the stream itself.
    let consumer_registry = DescriptorRegistry::new();
    let reader = Reader::with_registry(Cursor::new(bytes), consumer_registry);

    let mut n_events = 0;
    while let Some(event) = reader.next().unwrap() {
        let ids = event.tagged_entries("test");
        assert_eq!(ids.len(), 2);
        for id in ids {
            assert!(
                event.get_entry(id).is_some(),
                "entry should decode via on-wire descriptors alone"
            );
        }
        n_events += 1;
    }
    assert_eq!(n_events, 2);

    // Exactly the two files Particle and SimHit actually live in, even
    // though both events' entries were pushed through the same writer.
    assert_eq!(reader.registry().file_map().len(), 2);
}

#[test]
fn a_stream_truncated_before_its_third_bucket_still_decodes_what_was_written() {
    let mut writer = Writer::with_registry(Vec::new(), producer_registry());

    for (pdg, hit_particle, energy) in [(443, 1, 2.5), (7, 2, 1.0), (99, 3, 9.9)] {
        let mut event = Event::with_registry(producer_registry());
        event.add_entry("test", &Particle { pdg, ..Default::default() });
        event.add_entry(
            "test",
            &SimHit {
                particle: hit_particle,
                energy,
            },
        );
        writer.push(&mut event).unwrap();
        // Force each event into its own bucket, so the truncation below
        // lands inside the third bucket's body rather than ever having
        // been free-floating, unbucketed data.
        writer.flush().unwrap();
    }
    let bytes = writer.into_inner();

    // Cut the stream a few bytes short of complete: the first two buckets'
    // magic, header, and compressed body are all intact, but the third
    // bucket's body never finishes.
    let truncated = &bytes[..bytes.len() - 5];

    let consumer_registry = DescriptorRegistry::new();
    let reader = Reader::with_registry(Cursor::new(truncated.to_vec()), consumer_registry);

    for expected_pdg in [443, 7] {
        let event = reader.next().unwrap().expect("first two buckets stay decodable");
        let ids = event.tagged_entries("test");
        assert_eq!(ids.len(), 2);
        let particle_id = ids
            .iter()
            .copied()
            .find(|&id| event.entry_type(id) == Some("proio.model.example.Particle"))
            .unwrap();
        let handle = event.get_entry(particle_id).unwrap();
        let pdg = handle.lock().unwrap().get_field_by_number(3).unwrap().as_i32().unwrap();
        assert_eq!(pdg, expected_pdg);
    }

    // The third bucket's header parses (it was written before the cut),
    // but its body never completes, so reading it surfaces an I/O error
    // instead of panicking or silently fabricating a third event.
    assert!(reader.next().is_err());

    assert_eq!(reader.registry().file_map().len(), 2);
}
