fn main() {
    table_exchange_lib::run()
}
