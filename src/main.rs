fn main() -> anyhow::Result<()> {
    linksaver::cli::run()
}
