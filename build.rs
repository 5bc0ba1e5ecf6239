fn main() {
    // Bakes git commit, target and dependency metadata into the binary.
    built::write_built_file().expect("Failed to acquire build-time information");
}
