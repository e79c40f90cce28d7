mod assessment;
pub mod reference;

pub use assessment::{
    Assessment, NewAssessment, PropertyHeader, PropertyLocation, SupersededAssessment,
};
pub use reference::{ReferenceLibrary, ReferenceList, ReferenceOption};
