fn main() -> anyhow::Result<()> {
    preserve_flow::run()
}
