//! Columnar TVP buffer/reader (C2) and structural validator (C9) for the
//! sqlrt data-access runtime.

mod buffer;
mod coercion;
mod column_data;
mod pool;
mod reader;
mod validator;

pub use buffer::ColumnBuffer;
pub use coercion::{date_to_midnight_datetime, half_bits_to_f32, time_to_duration_since_midnight};
pub use column_data::ColumnData;

pub use reader::ColumnarReader;
pub use validator::{validate, ValidationMode};
