mod thing_type;

pub use thing_type::{
    InstancesIter, SubtypesIter, ThingType, TypeManager, ValueFiltered, VisibleTypes,
};
