#[rustversion::nightly]
const NIGHTLY: bool = true;

#[rustversion::not(nightly)]
const NIGHTLY: bool = false;

fn main() {
    println!("cargo:rustc-check-cfg=cfg(nightly)");
    // benches only build on a nightly toolchain
    if NIGHTLY {
        println!("cargo:rustc-cfg=nightly");
    }
}
