mod cipher_test;
mod common;
mod export_test;
mod write_db_test;
