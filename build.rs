fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // ESP-IDF builds need the sysenv exported by embuild; host builds
    // (tests, the uuid-to-btaddr tool) skip it.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
