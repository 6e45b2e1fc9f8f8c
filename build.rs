//! Build script for shift-matrix.

use std::{env, fs, path::PathBuf};

fn main() {
    println!("cargo:rustc-check-cfg=cfg(rust_analyzer)");

    let Ok(target) = env::var("TARGET") else {
        return;
    };
    let Some(memory_file) = memory_file_for(&target) else {
        // Host builds link without a memory map.
        return;
    };

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("cargo sets OUT_DIR"));
    let memory_x = fs::read_to_string(memory_file)
        .unwrap_or_else(|err| panic!("Failed to read {memory_file}: {err}"));
    fs::write(out_dir.join("memory.x"), memory_x).expect("Failed to write memory.x");
    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed={memory_file}");
}

fn memory_file_for(target: &str) -> Option<&'static str> {
    if target.starts_with("thumbv8m") {
        Some("memory-pico2.x")
    } else if target.starts_with("riscv32imac") {
        Some("memory-pico2-riscv.x")
    } else if target.starts_with("thumbv6m") {
        Some("memory-pico1.x")
    } else {
        None
    }
}
