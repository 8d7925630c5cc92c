// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Mailbox properties, driven against the simulated board.

use host_protocol::{Action, Bank, Status, WorkContext};
use host_sim::{lzma, sha256, Device, Error, Host, Program, SimConfig};
use manager::{ReleasePolicy, State};

const BUDGET: u64 = 1_000_000;

fn config() -> SimConfig {
    SimConfig {
        flash_size: 1 << 20,
        ..SimConfig::default()
    }
}

fn device() -> Device {
    Device::new(&config()).unwrap()
}

fn host() -> Host {
    Host::new(device(), BUDGET)
}

/// Pseudo-random bytes that do not compress.
fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut x = seed.max(1);
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect()
}

fn write_ctx(bank: Bank, offset: u32, data: &[u8], erase: bool) -> WorkContext {
    WorkContext {
        size: data.len() as u32,
        offset,
        erase: erase.into(),
        erase_bytes: if erase { data.len() as i32 } else { 0 },
        expected_sha256: sha256(data),
        bank: bank.to_u32(),
        action: Action::EraseAndFlash.to_u32(),
        ..Default::default()
    }
}

/// Fills `slot` the way the host does, bypassing its slot choice.
fn put(device: &mut Device, slot: usize, ctx: WorkContext, payload: &[u8]) {
    let mut region = device.region().unwrap();
    region.buffer_mut(slot).unwrap()[..payload.len()].copy_from_slice(payload);
    region.submit(slot, &ctx).unwrap();
}

fn status(device: &mut Device) -> u32 {
    device.region().unwrap().status()
}

/// Ticks until the device is idle with both slots free, or in error.
fn settle(device: &mut Device) {
    for _ in 0..BUDGET {
        device.tick().unwrap();
        let region = device.region().unwrap();
        let free = region.ready(0).unwrap() == 0 && region.ready(1).unwrap() == 0;
        let done = region.status() == Status::Idle.to_u32() && free;
        if done || matches!(device.state(), State::Error(_)) {
            return;
        }
    }
    panic!("device did not settle");
}

#[test]
fn idempotence() {
    let mut host = host();
    let data = noise(10_000, 7);
    let opts = Program {
        compress: false,
        ..Program::default()
    };
    host.program(Bank::External, 0x2_0000, &data, opts).unwrap();
    let first = host.device().ext().stats();
    assert!(first.page_programs > 0);

    host.program(Bank::External, 0x2_0000, &data, opts).unwrap();
    let second = host.device().ext().stats();
    assert_eq!(second.page_programs, first.page_programs);
    assert_eq!(second.block_erases, first.block_erases);
    assert_eq!(second.chip_erases, first.chip_erases);
    assert_eq!(host.status().unwrap(), Status::Idle.to_u32());
}

#[test]
fn ordering_follows_tokens_not_slots() {
    let mut device = device();
    let older = noise(4096, 1);
    let newer = noise(4096, 2);
    // Token 1 in slot 1, token 2 in slot 0, both for the same destination.
    let mut ctx = write_ctx(Bank::External, 0x4000, &older, true);
    ctx.ready = 1;
    put(&mut device, 1, ctx, &older);
    let mut ctx = write_ctx(Bank::External, 0x4000, &newer, true);
    ctx.ready = 2;
    put(&mut device, 0, ctx, &newer);

    // Token 1 is claimed first.
    while device.region().unwrap().ready(1).unwrap() != 0 {
        assert_eq!(device.region().unwrap().ready(0).unwrap(), 2);
        device.tick().unwrap();
    }
    // Token 2 waits until token 1 is fully done.
    while device.state() != State::Idle {
        assert_eq!(device.region().unwrap().ready(0).unwrap(), 2);
        device.tick().unwrap();
    }
    assert_eq!(&device.ext().contents()[0x4000..0x5000], &older[..]);

    settle(&mut device);
    assert_eq!(status(&mut device), Status::Idle.to_u32());
    assert_eq!(&device.ext().contents()[0x4000..0x5000], &newer[..]);
}

#[test]
fn out_of_order_token_is_never_claimed() {
    let mut device = device();
    let data = noise(256, 3);
    let mut ctx = write_ctx(Bank::External, 0, &data, true);
    ctx.ready = 2;
    put(&mut device, 0, ctx, &data);
    for _ in 0..1000 {
        device.tick().unwrap();
    }
    assert_eq!(device.region().unwrap().ready(0).unwrap(), 2);
    assert_eq!(device.ext().stats().page_programs, 0);
}

#[test]
fn round_trip() {
    let mut host = host();
    let cases: [(Bank, u32, usize); 7] = [
        (Bank::External, 0, 1),
        (Bank::External, 0x1000, 255),
        (Bank::External, 0x3000, 257),
        (Bank::External, 0x8000, 100_000),
        (Bank::External, 0x4_0000, 256 << 10),
        (Bank::Internal1, 0x2000, 1000),
        (Bank::Internal2, 0x4_0000, 256 << 10),
    ];
    for (i, (bank, offset, len)) in cases.into_iter().enumerate() {
        let data = noise(len, i as u32 + 10);
        host.program(bank, offset, &data, Program::default()).unwrap();

        let device = host.device();
        let start = bank.internal_base() as usize + offset as usize;
        let written = match bank {
            Bank::External => &device.ext().contents()[start..start + len],
            Bank::Internal1 | Bank::Internal2 => &device.int().contents()[start..start + len],
        };
        assert_eq!(sha256(written), sha256(&data), "{bank:?} {offset:#x} {len}");
    }
    assert_eq!(host.device().ext().stats().mode_violations, 0);
    assert_eq!(host.device().ext().stats().busy_violations, 0);
}

#[test]
fn decompression_round_trip() {
    let data: Vec<u8> = (0..200_000u32).map(|i| (i / 1000) as u8).collect();
    let packed = lzma::compress(&data).unwrap();
    assert!(packed.len() < data.len());

    let mut raw = device();
    put(&mut raw, 0, WorkContext { ready: 1, ..write_ctx(Bank::External, 0x1_0000, &data, true) }, &data);
    settle(&mut raw);

    let mut compressed = device();
    let ctx = WorkContext {
        compressed_size: packed.len() as u32,
        ready: 1,
        ..write_ctx(Bank::External, 0x1_0000, &data, true)
    };
    put(&mut compressed, 0, ctx, &packed);
    settle(&mut compressed);

    assert_eq!(status(&mut raw), Status::Idle.to_u32());
    assert_eq!(status(&mut compressed), Status::Idle.to_u32());
    assert_eq!(raw.ext().contents(), compressed.ext().contents());
}

#[test]
fn corrupt_compressed_payload() {
    let mut device = device();
    let data = vec![0x11; 50_000];
    let mut packed = lzma::compress(&data).unwrap();
    packed.truncate(packed.len() / 2);
    let ctx = WorkContext {
        compressed_size: packed.len() as u32,
        ready: 1,
        ..write_ctx(Bank::External, 0, &data, true)
    };
    put(&mut device, 0, ctx, &packed);
    settle(&mut device);
    assert_eq!(status(&mut device), Status::BadDecompress.to_u32());
    assert_eq!(device.ext().stats().page_programs, 0);
}

#[test]
fn unaligned_erase_is_rejected_before_touching_flash() {
    let mut host = host();
    host.device_mut().ext_mut().contents_mut().fill(0);
    let data = noise(512, 4);
    let ctx = write_ctx(Bank::External, 0x1100, &data, true);
    host.submit(ctx, &data).unwrap();
    let result = host.wait_for_all_contexts_complete();
    assert!(matches!(result, Err(Error::Device(s)) if s == Status::NotAligned.to_u32()));

    let stats = host.device().ext().stats();
    assert_eq!(stats.block_erases, 0);
    assert_eq!(stats.chip_erases, 0);
    assert_eq!(stats.page_programs, 0);
}

#[test]
fn alignment_follows_published_erase_size() {
    let config = SimConfig {
        erase_size: 64 << 10,
        ..config()
    };
    let mut host = Host::new(Device::new(&config).unwrap(), BUDGET);
    assert_eq!(host.geometry().unwrap(), (1 << 20, 64 << 10));
    let data = noise(512, 5);
    let result = host.program(Bank::External, 0x1000, &data, Program::default());
    assert!(matches!(result, Err(Error::Device(s)) if s == Status::NotAligned.to_u32()));
    assert_eq!(host.device().ext().stats().page_programs, 0);
}

#[test]
fn unaligned_internal_offset() {
    let mut host = host();
    let data = noise(512, 6);
    let ctx = write_ctx(Bank::Internal1, 0x1000, &data, false);
    host.submit(ctx, &data).unwrap();
    let result = host.wait_for_all_contexts_complete();
    assert!(matches!(result, Err(Error::Device(s)) if s == Status::NotAligned.to_u32()));
    assert_eq!(host.device().int().erases(), 0);
}

#[test]
fn corrupted_upload() {
    let mut device = device();
    device.ext_mut().contents_mut().fill(0);
    let data = noise(8192, 8);
    let mut upload = data.clone();
    upload[1234] ^= 0x40;
    let ctx = WorkContext {
        ready: 1,
        ..write_ctx(Bank::External, 0x8000, &data, true)
    };
    put(&mut device, 0, ctx, &upload);

    while !matches!(device.state(), State::Error(_)) {
        device.tick().unwrap();
    }
    assert_eq!(status(&mut device), Status::BadHashRam.to_u32());
    let at_fault = device.ext().stats();
    assert_eq!(at_fault.page_programs, 0);

    for _ in 0..1000 {
        device.tick().unwrap();
    }
    assert_eq!(device.ext().stats(), at_fault);
    assert_eq!(status(&mut device), Status::BadHashRam.to_u32());
}

#[test]
fn erased_destination_is_not_erased_again() {
    let mut host = host();
    let data = noise(20_000, 9);
    host.program(Bank::External, 0x1_0000, &data, Program::default()).unwrap();
    let stats = host.device().ext().stats();
    assert_eq!(stats.block_erases, 0);
    assert!(stats.page_programs > 0);

    // A single dirty byte at the end of the rounded erase range is enough.
    host.device_mut().ext_mut().contents_mut()[0x1_0000 + 0x5000 - 1] = 0;
    let data = noise(20_000, 10);
    host.program(Bank::External, 0x1_0000, &data, Program::default()).unwrap();
    assert!(host.device().ext().stats().block_erases > 0);
    assert_eq!(&host.device().ext().contents()[0x1_0000..0x1_0000 + data.len()], &data[..]);
}

#[test]
fn scenario() {
    let mut device = device();
    device.ext_mut().contents_mut()[0x1000..0x2000].fill(0);
    let payload = noise(512, 11);
    let ctx = WorkContext {
        size: 512,
        offset: 0x1000,
        erase: 1,
        erase_bytes: 4096,
        compressed_size: 0,
        expected_sha256: sha256(&payload),
        bank: 0,
        action: Action::EraseAndFlash.to_u32(),
        response_ready: 0,
        ready: 1,
        ..Default::default()
    };
    put(&mut device, 0, ctx, &payload);

    let mut states = vec![device.state()];
    let mut statuses = vec![];
    for _ in 0..100 {
        device.tick().unwrap();
        if states.last() != Some(&device.state()) {
            states.push(device.state());
        }
        let now = status(&mut device);
        if statuses.last() != Some(&now) {
            statuses.push(now);
        }
        assert!(!device.region().unwrap().response_ready(0).unwrap());
    }

    assert_eq!(
        states,
        [
            State::Idle,
            State::Decompressing,
            State::CheckHashRam,
            State::Erase,
            State::EraseFinish,
            State::Program,
            State::CheckHashFlash,
            State::Idle,
        ]
    );
    let erase = statuses.iter().position(|s| *s == Status::Erase.to_u32());
    let prog = statuses.iter().position(|s| *s == Status::Prog.to_u32());
    assert!(erase.is_some() && prog.is_some() && erase < prog);
    assert_eq!(statuses.last(), Some(&Status::Idle.to_u32()));
    assert_eq!(&device.ext().contents()[0x1000..0x1200], &payload[..]);
    assert!(device.ext().contents()[0x1200..0x2000].iter().all(|b| *b == 0xff));
}

#[test]
fn release_after_verify_holds_the_slot() {
    let config = SimConfig {
        device: manager::Config {
            release: ReleasePolicy::AfterVerify,
            ..manager::Config::default()
        },
        ..config()
    };
    let mut device = Device::new(&config).unwrap();
    let data = noise(4096, 12);
    put(&mut device, 0, WorkContext { ready: 1, ..write_ctx(Bank::External, 0, &data, true) }, &data);
    while device.state() != State::CheckHashFlash {
        device.tick().unwrap();
        if device.state() != State::Idle {
            assert_eq!(device.region().unwrap().ready(0).unwrap(), 1);
        }
    }
    device.tick().unwrap();
    assert_eq!(device.region().unwrap().ready(0).unwrap(), 0);
}

#[test]
fn release_after_copy_frees_the_slot_early() {
    let mut device = device();
    let data = noise(4096, 13);
    put(&mut device, 0, WorkContext { ready: 1, ..write_ctx(Bank::External, 0, &data, true) }, &data);
    while device.state() != State::Program {
        device.tick().unwrap();
    }
    assert_eq!(device.region().unwrap().ready(0).unwrap(), 0);
    assert_ne!(status(&mut device), Status::Idle.to_u32());
}
