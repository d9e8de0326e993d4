#![cfg(feature = "hdf5")]
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use escan_io::{Hdf5Cache, LoadConfig, ScanLoader, CACHE_SUFFIX};
use tempfile::tempdir;

const XAFS: &str = "\
; Epics Scan 1 dimensional scan
; current scan = 7
; User Titles:
;   As edge
; PV list:
;   13IDC:m1.VAL = 1.5
; Scan Regions:
;   11800 11900 10
; Column Labels:
; P1 = (Energy) --> 13IDC:En.VAL
; D1 = (I0) --> 13IDC:scaler1.S2
; D2 = (mca1: As Ka) --> 13SDD1:mca1.R0
; D3 = (Det1 icr) --> 13SDD1:dxp1:ICR
; D4 = (Det1 ocr) --> 13SDD1:dxp1:OCR
; Scan began at      2026-10-16 11:00:00
;----------------
; P1 D1 D2 D3 D4
11800 500 40 1000 800
11810 510 42 900 900
11820 520 44 950 760
; Scan ended at      2026-10-16 11:02:00
";

fn age(path: &Path, secs: u64) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(secs))
        .unwrap();
}

#[test]
fn test_loader_roundtrip_through_hdf5() {
    let dir = tempdir().unwrap();
    let scan = dir.path().join("as_xafs.003");
    fs::write(&scan, XAFS).unwrap();

    let loader = ScanLoader::with_cache(LoadConfig::default(), Box::new(Hdf5Cache::new(Some(4))));
    let parsed = loader.load(&scan).unwrap();
    let cache = dir.path().join(format!("as_xafs.003{CACHE_SUFFIX}"));
    assert!(cache.exists());

    age(&scan, 120);
    age(&cache, 60);
    let cached = loader.load(&scan).unwrap();
    assert_eq!(loader.parse_count(), 1);
    assert_eq!(cached, parsed);
    assert_eq!(cached.info["icr/ocr"], "True");
}

#[test]
fn test_garbage_cache_is_replaced() {
    let dir = tempdir().unwrap();
    let scan = dir.path().join("as_xafs.003");
    fs::write(&scan, XAFS).unwrap();
    let cache = dir.path().join(format!("as_xafs.003{CACHE_SUFFIX}"));
    fs::write(&cache, "not hdf5").unwrap();
    age(&scan, 60);

    let loader = ScanLoader::new(LoadConfig::default());
    let record = loader.load(&scan).unwrap();
    assert_eq!(loader.parse_count(), 1);
    assert_eq!(record.detectors.shape(), &[2, 3]);

    // the rewritten cache is usable
    age(&scan, 120);
    age(&cache, 60);
    loader.load(&scan).unwrap();
    assert_eq!(loader.parse_count(), 1);
}
