// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use {crate::ExitCode, std::io::Write};

const SMALL_FLASH: &str = "0x100000";

/// Info on a fresh board reports the geometry and an idle device.
#[test]
fn info() {
    let output = test(["info", "--flash-size", SMALL_FLASH]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("1 MiB (1048576)"));
    assert!(output.stdout.contains("4 KiB (4096)"));
    assert!(output.stdout.contains("IDLE (0xcafe0000)"));
    assert!(output.stderr.is_empty());
}

/// Flash a file into an image, then hash it back from the saved image.
#[test]
fn flash_then_hash_from_image() {
    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
    let input = create_file(&data);
    let image = tempfile::NamedTempFile::new().unwrap();
    let image_path = image.path().to_str().unwrap();

    let output = test([
        "flash",
        "--flash-size",
        SMALL_FLASH,
        "--image",
        image_path,
        "--offset",
        "0x10000",
        input.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    // Padded to the 4 KiB erase size.
    assert!(output.stdout.contains("(303104)"));
    assert!(output.stdout.contains("2 of 2 sent"));

    let saved = std::fs::read(image.path()).unwrap();
    assert_eq!(saved.len(), 1 << 20);
    assert_eq!(&saved[0x10000..0x10000 + data.len()], &data[..]);
    assert!(saved[0x10000 + data.len()..].iter().all(|b| *b == 0xff));

    let output = test([
        "hash",
        "--flash-size",
        SMALL_FLASH,
        "--image",
        image_path,
        "--offset",
        "0x10000",
        "--size",
        "262144",
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    let expected = hex::encode(host_sim::sha256(&data[..262144]));
    assert!(output.stdout.contains(&format!("0x00010000 {expected}")));

    // Flashing the same file again sends nothing.
    let output = test([
        "flash",
        "--flash-size",
        SMALL_FLASH,
        "--image",
        image_path,
        "--offset",
        "0x10000",
        input.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("0 of 2 sent"));
}

/// Erase a range of a saved image.
#[test]
fn erase_range() {
    let image = create_file(&vec![0u8; 1 << 20]);
    let image_path = image.path().to_str().unwrap();
    let output = test([
        "erase",
        "--flash-size",
        SMALL_FLASH,
        "--image",
        image_path,
        "--offset",
        "0x2000",
        "--size",
        "100",
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("erased"));

    let saved = std::fs::read(image.path()).unwrap();
    assert!(saved[..0x2000].iter().all(|b| *b == 0));
    assert!(saved[0x2000..0x3000].iter().all(|b| *b == 0xff));
    assert!(saved[0x3000..].iter().all(|b| *b == 0));
}

#[test]
fn erase_whole_chip() {
    let image = create_file(&vec![0u8; 1 << 20]);
    let output = test([
        "erase",
        "--flash-size",
        SMALL_FLASH,
        "--image",
        image.path().to_str().unwrap(),
        "--whole-chip",
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("whole chip"));
    let saved = std::fs::read(image.path()).unwrap();
    assert!(saved.iter().all(|b| *b == 0xff));
}

#[test]
fn erase_needs_a_size() {
    let output = test(["erase", "--offset", "0x1000"]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("--size or --whole-chip"));
}

/// Internal banks are written in one context.
#[test]
fn flash_internal() {
    let input = create_file(&[0x5a; 1000]);
    let output = test([
        "flash",
        "--flash-size",
        SMALL_FLASH,
        "--bank",
        "internal2",
        "--offset",
        "0x4000",
        input.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("8 KiB (8192) at internal2 0x4000"));
}

/// Absolute addresses are caught on the host.
#[test]
fn absolute_offset() {
    let input = create_file(b"Hello, world!");
    let output = test([
        "flash",
        "--flash-size",
        SMALL_FLASH,
        "--offset",
        "0x90001000",
        input.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("did you mean 0x00001000?"));
}

#[test]
fn unaligned_offset() {
    let input = create_file(b"Hello, world!");
    let output = test([
        "flash",
        "--flash-size",
        SMALL_FLASH,
        "--offset",
        "0x100",
        input.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("must be a multiple of 4096"));
}

#[test]
fn image_larger_than_flash() {
    let input = create_file(&vec![0; 2 << 20]);
    let output = test([
        "flash",
        "--flash-size",
        SMALL_FLASH,
        input.path().to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("do not fit"));
}

#[test]
fn missing_input_file() {
    let output = test(["flash", "/nonexistent/firmware.bin"]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("failed to read input file"));
}

#[test]
fn config_file() {
    let config = create_file(
        br#"
        flash-size = 2097152
        erase-size = 65536

        [device]
        release = "after-verify"
        "#,
    );
    let output = test(["info", "--config", config.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("2 MiB (2097152)"));
    assert!(output.stdout.contains("64 KiB (65536)"));
}

#[test]
fn flash_size_in_config_and_cli() {
    let config = create_file(b"flash-size = 2097152\n");
    let output = test([
        "info",
        "--config",
        config.path().to_str().unwrap(),
        "--flash-size",
        SMALL_FLASH,
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output
        .stderr
        .contains("flash size specified both in config file and CLI"));
}

#[test]
fn unknown_config_field() {
    let config = create_file(b"flash-sise = 1\n");
    let output = test(["info", "--config", config.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("config file format error in TOML"));
}

#[test]
fn bad_geometry() {
    let output = test(["info", "--flash-size", "1000"]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("invalid flash geometry"));
}

#[test]
fn bad_number() {
    let output = test(["info", "--flash-size", "0xzz"]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("invalid number"));
}

fn test<const N: usize>(args: [&str; N]) -> Output {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = crate::main_args(
        std::iter::once("host-sim").chain(args),
        &mut stdout,
        &mut stderr,
    );
    println!("* args: {:?}", args);
    println!("* exit_code: {:?}", exit_code);
    println!("* stdout:\n{}", String::from_utf8_lossy(&stdout));
    println!("* stderr:\n{}", String::from_utf8_lossy(&stderr));
    Output {
        exit_code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[derive(Debug)]
struct Output {
    exit_code: ExitCode,
    stdout: String,
    stderr: String,
}

fn create_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}
