//! Shared fixtures for integration tests

#![allow(dead_code)]

use nachos_vm::vm::{NoffHeader, NoffSegment, NOFF_HEADER_SIZE};
use nachos_vm::{Machine, MemStore, SpaceId, VmConfig};

/// Build a NOFF image whose code and data bytes are `(offset % 251)`
pub fn image(code: u32, data: u32, bss: u32) -> Vec<u8> {
    let base = NOFF_HEADER_SIZE as u32;
    let header = NoffHeader {
        code: NoffSegment::new(0, base, code),
        init_data: NoffSegment::new(code, base + code, data),
        uninit_data: NoffSegment::new(code + data, 0, bss),
    };
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend((0..code + data).map(|i| (i % 251) as u8));
    bytes
}

/// Byte stored at `offset` of the image's code/data
pub fn image_byte(offset: usize) -> u8 {
    (offset % 251) as u8
}

/// Machine with an in-memory swap store
pub fn machine(config: VmConfig) -> Machine {
    Machine::new(config, Box::new(MemStore::new())).unwrap()
}

/// Load an image and make it the running space
pub fn run(machine: &mut Machine, code: u32, data: u32, bss: u32) -> SpaceId {
    let id = machine
        .create_space(Box::new(MemStore::from_bytes(image(code, data, bss))))
        .unwrap();
    machine.switch_to(id).unwrap();
    id
}
