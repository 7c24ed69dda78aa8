mod session;

pub use session::RoomSession;
