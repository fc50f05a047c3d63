/// Комплексная выборка на RF-стороне.
pub type Sample = num_complex::Complex32;

/// Элемент потока: комплексная выборка или один бит (`u8`, 0/1).
///
/// Блоки копируют элементы по значению, а `Default` служит нулевым
/// заполнителем.
pub trait Unit: Copy + Default + Send + 'static {}

impl<T> Unit for T where T: Copy + Default + Send + 'static {}
