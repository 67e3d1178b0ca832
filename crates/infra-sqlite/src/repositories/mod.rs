// Repositories over the storage facade

mod category;
mod channel;
mod hotel;
mod multicast;
mod task_run;

pub use category::CategoryRepository;
pub use channel::{ChannelRepository, NewChannel};
pub use hotel::{HotelRepository, NewHotel};
pub use multicast::MulticastRepository;
pub use task_run::SqliteTaskRunRecorder;
