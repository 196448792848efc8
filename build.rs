use std::env;
use std::fs::File;
use std::io::Write;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-env-changed=HAZMAP_SCAN_THRESHOLD");

    let out_dir = env::var("OUT_DIR").expect("no out directory");
    let dest = Path::new(&out_dir).join("build_constants.rs");

    let mut file = File::create(&dest).expect("could not create file");

    let scan: u32 = env::var("HAZMAP_SCAN_THRESHOLD")
        .map_or(Ok(128), |var| var.parse())
        .expect("failed to parse env variable HAZMAP_SCAN_THRESHOLD");

    if !scan.is_power_of_two() {
        panic!("invalid HAZMAP_SCAN_THRESHOLD value ({}), must be a power of two", scan);
    }

    write!(&mut file, "const DEFAULT_SCAN_THRESHOLD: u32 = {};", scan)
        .expect("could not write to file");
}
