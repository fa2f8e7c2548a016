#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_bsb::{AdditiveSum, FrameCodec};

fuzz_target!(|data: &[u8]| {
    // Must never panic, whatever the line delivers
    if let Some(telegram) = FrameCodec::new().decode(data) {
        assert_eq!(usize::from(data[3]), data.len());
        assert!(telegram.payload().len() + 11 == data.len());
    }
    let _ = FrameCodec::with_checksum(AdditiveSum).decode(data);
});
