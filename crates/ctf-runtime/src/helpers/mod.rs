pub(crate) mod value_path;
