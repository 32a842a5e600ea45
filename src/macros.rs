macro_rules! ok_or_errno {
    ($success:expr => $($scb:tt)+) => {
        if $success {
            Ok($($scb)+)
        } else {
            Err(::std::io::Error::last_os_error())
        }
    };
}

macro_rules! builder_setters {
    ($($(#[$attr:meta])* $name:ident : $ty:ty),+ $(,)?) => {$(
        $(#[$attr])*
        #[must_use = "builder setters take the entire structure and return the result"]
        #[inline(always)]
        pub fn $name(mut self, $name: $ty) -> Self {
            self.$name = $name;
            self
        }
    )+};
}
