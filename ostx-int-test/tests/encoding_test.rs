use ostx::common::{decode, encode, ENCODING_ALPHABET, ENCODING_PAD};
use ostx::errors::ErrorKind;
use ostx::transaction::JournalLine;
use rand::Rng;

#[ctor::ctor]
fn init() {
    colog::init();
}

#[test]
fn test_random_payloads_round_trip() {
    let mut rng = rand::thread_rng();
    for len in 0..100 {
        let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let text = encode(&bytes);
        assert_eq!(text.len() % 4, 0);
        assert!(text
            .bytes()
            .all(|b| ENCODING_ALPHABET.contains(&b) || b == ENCODING_PAD));
        assert_eq!(decode(&text).unwrap(), bytes);
    }
}

#[test]
fn test_every_foreign_character_is_rejected() {
    for c in 0u8..=127 {
        if ENCODING_ALPHABET.contains(&c) || c == ENCODING_PAD {
            continue;
        }
        let text = format!("AB{}D", c as char);
        let err = decode(&text).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DecodingError, "accepted {:?}", c as char);
    }
}

#[test]
fn test_journal_line_carries_binary_payload() {
    let payload: Vec<u8> = (0..=255).collect();
    let line = JournalLine::new(
        ostx::common::ModuleKind::Pipe,
        "write",
        &ostx::resource::ResourceId::named("with space"),
        &payload,
    );
    let rendered = line.render();
    assert!(rendered.is_ascii());
    assert!(!rendered.contains('\n'));
    assert_eq!(JournalLine::parse(&rendered).unwrap(), line);
}
