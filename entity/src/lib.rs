pub mod greylist;

pub mod prelude {
    pub use super::greylist::Entity as Greylist;
}
