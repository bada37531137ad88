//! CLI 명령어 구현 모듈.

pub mod get;
pub mod health;
pub mod invalidate;
