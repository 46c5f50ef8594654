fn main() {
    fieldsync_lib::run()
}
