fn main() {
    spinwatch::run()
}
