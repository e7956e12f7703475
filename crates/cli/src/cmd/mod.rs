mod boot;
mod resolve;
mod site;
mod watch;

pub use boot::cmd_boot;
pub use resolve::cmd_resolve;
pub use site::cmd_site;
pub use watch::cmd_watch;
