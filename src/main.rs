fn main() -> anyhow::Result<()> {
    lefocus_tracker_lib::run()
}
