#![allow(dead_code)]

use std::fs::File;
use std::io::Read;
use std::path::Path;

use assert_cmd::assert::Assert;
use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;

/// `layr` with the reproducible-build clock cleared.
pub fn layr() -> Command {
    let mut cmd = cargo_bin_cmd!("layr");
    cmd.env_remove("SOURCE_DATE_EPOCH");
    cmd
}

pub fn parse_json(assert: &Assert) -> Value {
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout");
    serde_json::from_str(&stdout).unwrap_or_else(|err| panic!("invalid json {err}: {stdout}"))
}

pub fn stderr(assert: &Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stderr).into_owned()
}

pub struct ArchivedEntry {
    pub name: String,
    pub mode: u32,
    pub mtime: u64,
    pub data: Vec<u8>,
}

pub fn read_archive(path: &Path) -> Vec<ArchivedEntry> {
    let mut archive = tar::Archive::new(File::open(path).expect("open archive"));
    archive
        .entries()
        .expect("archive entries")
        .map(|entry| {
            let mut entry = entry.expect("archive entry");
            let name = String::from_utf8(entry.path_bytes().into_owned()).expect("utf8 name");
            let mode = entry.header().mode().expect("mode");
            let mtime = entry.header().mtime().expect("mtime");
            let mut data = Vec::new();
            entry.read_to_end(&mut data).expect("entry data");
            ArchivedEntry {
                name,
                mode,
                mtime,
                data,
            }
        })
        .collect()
}
