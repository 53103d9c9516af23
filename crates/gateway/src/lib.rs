pub mod http;

pub use http::{HttpPaymentGateway, PaymentApiData, PaymentApiResponse};
