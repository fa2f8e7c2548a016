#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use voltage_bsb::{BusAddress, Command, FrameCodec};

#[derive(Debug, Arbitrary)]
struct Input {
    source: u8,
    destination: u8,
    command: u8,
    parameter_number: u32,
    payload: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let Some(command) = Command::from_u8(input.command) else {
        return;
    };
    let codec = FrameCodec::new();
    let address = BusAddress::new(input.source & 0x7F, input.destination);

    if let Ok(frame) = codec.encode(address, input.parameter_number, command, &input.payload) {
        let telegram = codec.decode(&frame).expect("encoded frame must decode");
        assert_eq!(telegram.parameter_number, input.parameter_number);
        assert_eq!(telegram.command, command);
        assert_eq!(telegram.payload(), input.payload.as_slice());
    }
});
