#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_bsb::{FrameCodec, FrameEvent, FrameReader};

fuzz_target!(|chunks: Vec<Vec<u8>>| {
    let mut reader = FrameReader::default();
    let codec = FrameCodec::new();

    for chunk in &chunks {
        reader.feed(chunk, |event| {
            if let FrameEvent::Telegram(telegram) = event {
                // Anything the reader accepts must re-encode to a valid frame
                let frame = codec.encode_telegram(&telegram);
                assert_eq!(codec.decode(&frame), Some(telegram));
            }
        });
    }
});
