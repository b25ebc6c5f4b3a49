fn main() {
    seedcc::stage_main(seedcc::driver::Stage::M1);
}
