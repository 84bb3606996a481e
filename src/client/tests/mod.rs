// src/client/tests/mod.rs

mod health_check_tests;
