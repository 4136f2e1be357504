/// Asserts at compile time that the given type is `Send` and `Sync`.
///
/// For generic types, name the instantiation to check, e.g.
/// `assert_send_and_sync!(KeyServer<reqwest::Client>);`.
macro_rules! assert_send_and_sync {
    ($x:ty) => {
        const _: () = {
            fn _assert_send<T: Send>() {}
            fn _assert_sync<T: Sync>() {}

            #[allow(dead_code)]
            fn _assert_send_and_sync() {
                _assert_send::<$x>();
                _assert_sync::<$x>();
            }
        };
    };
}
