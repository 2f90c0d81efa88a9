pub mod inspect;
pub mod rebuild;
pub mod sync;
pub mod update;
pub mod watch;
pub mod worker;
