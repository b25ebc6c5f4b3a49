fn main() {
    seedcc::stage_main(seedcc::driver::Stage::Hex2);
}
